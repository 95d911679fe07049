//! Text-generation capability consumed by the analysis stage.
//!
//! The core is polymorphic over [`TextGenerator`]; concrete adapters
//! translate between these types and a vendor's wire format and are
//! injected at composition time.

pub mod http;
pub mod retry;

use async_trait::async_trait;

use vg_domain::Result;

pub use http::HttpGenerator;
pub use retry::RetryingGenerator;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A vendor-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// System framing prepended to the prompt.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Maximum tokens in the response. `None` lets the adapter choose.
    pub max_tokens: Option<u32>,
    /// Sampling temperature. `None` lets the adapter choose.
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    Other,
}

/// Token accounting, when the vendor reports it.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A vendor-agnostic generation response.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub stop_reason: StopReason,
    pub usage: Option<TokenUsage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `generate_text` capability. Failures map to `LlmUnavailable` so the
/// analysis stage can fall back to the placeholder analysis.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send a generation request and wait for the full response.
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse>;

    /// A unique identifier for this generator instance.
    fn generator_id(&self) -> &str;
}
