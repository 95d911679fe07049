//! Shared domain types for Vantage: entities, error taxonomy, configuration,
//! and the cooperative cancellation token used across the pipeline.

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;

pub use cancel::CancelToken;
pub use error::{Error, ErrorKind, Result};
