//! HTTP adapter for a generation endpoint speaking a plain JSON contract:
//! request `{model, system?, prompt, max_tokens, temperature, stop}`,
//! response `{content, stop_reason?, usage?{input_tokens, output_tokens}}`.
//!
//! Vendor specifics beyond this contract live outside the core; anything
//! that needs a richer wire format implements [`TextGenerator`] itself.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use vg_domain::config::LlmConfig;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::Result;

use crate::{GenerateRequest, GenerateResponse, StopReason, TextGenerator, TokenUsage};

pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    default_max_tokens: u32,
    default_temperature: f32,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct WireResponse {
    content: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

impl HttpGenerator {
    /// Build from config. The bearer key is read from the configured env
    /// var once, at construction.
    pub fn from_config(cfg: &LlmConfig, timeout: Duration) -> Result<Option<Self>> {
        let endpoint = match &cfg.endpoint {
            Some(e) => e.clone(),
            None => return Ok(None),
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::new(ErrorKind::LlmUnavailable, format!("build http client: {e}"))
            })?;
        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(env = %cfg.api_key_env, "LLM bearer key unset, sending unauthenticated");
        }
        Ok(Some(Self {
            client,
            endpoint,
            model: cfg.model.clone(),
            api_key,
            default_max_tokens: cfg.max_tokens,
            default_temperature: cfg.temperature,
        }))
    }

    fn parse_stop_reason(raw: Option<&str>) -> StopReason {
        match raw {
            Some("end_turn") | Some("stop") | None => StopReason::EndTurn,
            Some("max_tokens") | Some("length") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            Some(_) => StopReason::Other,
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse> {
        let body = json!({
            "model": self.model,
            "system": req.system,
            "prompt": req.prompt,
            "max_tokens": req.max_tokens.unwrap_or(self.default_max_tokens),
            "temperature": req.temperature.unwrap_or(self.default_temperature),
            "top_p": req.top_p,
            "top_k": req.top_k,
            "stop": req.stop_sequences,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            let detail = if e.is_timeout() { "timeout" } else { "send" };
            Error::new(
                ErrorKind::LlmUnavailable,
                format!("generation request failed ({detail}): {e}"),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(
                ErrorKind::LlmUnavailable,
                format!("generation endpoint returned {status}"),
            ));
        }

        let wire: WireResponse = response.json().await.map_err(|e| {
            Error::new(
                ErrorKind::LlmUnavailable,
                format!("undecodable generation response: {e}"),
            )
        })?;

        Ok(GenerateResponse {
            content: wire.content,
            stop_reason: Self::parse_stop_reason(wire.stop_reason.as_deref()),
            usage: wire.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }

    fn generator_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(
            HttpGenerator::parse_stop_reason(Some("end_turn")),
            StopReason::EndTurn
        );
        assert_eq!(
            HttpGenerator::parse_stop_reason(Some("max_tokens")),
            StopReason::MaxTokens
        );
        assert_eq!(
            HttpGenerator::parse_stop_reason(Some("length")),
            StopReason::MaxTokens
        );
        assert_eq!(
            HttpGenerator::parse_stop_reason(Some("stop_sequence")),
            StopReason::StopSequence
        );
        assert_eq!(
            HttpGenerator::parse_stop_reason(Some("weird")),
            StopReason::Other
        );
        assert_eq!(HttpGenerator::parse_stop_reason(None), StopReason::EndTurn);
    }

    #[test]
    fn disabled_without_endpoint() {
        let cfg = LlmConfig::default();
        let built = HttpGenerator::from_config(&cfg, Duration::from_secs(5)).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn wire_response_tolerates_missing_fields() {
        let wire: WireResponse = serde_json::from_str(r#"{"content": "hello"}"#).unwrap();
        assert_eq!(wire.content, "hello");
        assert!(wire.stop_reason.is_none());
        assert!(wire.usage.is_none());
    }
}
