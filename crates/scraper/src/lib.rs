//! Snapshot capture: the page-fetcher capability, the capture worker,
//! the rate/concurrency governor, and the snapshot validator.

pub mod browser;
pub mod capture;
pub mod governor;
pub mod validator;

pub use browser::{FetchOptions, HttpFetcher, PageContent, PageFetcher, ResourceType};
pub use capture::{with_cancel, Capture, CaptureOptions, CaptureOutcome, CaptureWorker};
pub use governor::{Governor, Lease};
pub use validator::SnapshotValidator;
