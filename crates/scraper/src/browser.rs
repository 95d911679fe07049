//! Page-fetcher capability and the reqwest-backed fallback implementation.
//!
//! A headless-browser collaborator implements [`PageFetcher`] out of tree;
//! [`HttpFetcher`] is the plain-HTTP fallback the gateway ships with.
//! Limits:
//! - per-request timeout from the caller's options
//! - hard response-size cap (default 5MB)
//! - redirect limit (5 hops)
//! - http/https absolute URLs only

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use tokio::time::Instant;

use vg_domain::config::ScraperConfig;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resource classes a browser collaborator is told not to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Image,
    Font,
    Media,
    Stylesheet,
    Script,
}

impl ResourceType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Some(Self::Image),
            "font" | "fonts" => Some(Self::Font),
            "media" => Some(Self::Media),
            "stylesheet" | "css" => Some(Self::Stylesheet),
            "script" | "js" => Some(Self::Script),
            _ => None,
        }
    }

    /// Parse a config list, dropping unknown names with a log line.
    pub fn parse_list(raw: &[String]) -> Vec<Self> {
        raw.iter()
            .filter_map(|s| {
                let parsed = Self::parse(s);
                if parsed.is_none() {
                    tracing::warn!(value = %s, "unknown blocked resource type, ignoring");
                }
                parsed
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub blocked_resource_types: Vec<ResourceType>,
}

/// One fetched page. `http_status` is recorded verbatim — success
/// classification happens in the capture worker.
#[derive(Clone, Debug)]
pub struct PageContent {
    pub html: String,
    pub text: String,
    pub title: Option<String>,
    pub http_status: u16,
    pub duration: Duration,
}

/// The headless-browser capability.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &Url, opts: &FetchOptions) -> Result<PageContent>;
}

/// Parse and police a capture URL: absolute, http/https, with a host.
pub fn validate_capture_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::validation(format!("invalid capture url {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::validation(format!(
                "capture url must be http(s), got {other}://"
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(Error::validation(format!("capture url {raw:?} has no host")));
    }
    Ok(url)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP fallback fetcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn from_config(cfg: &ScraperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::new(ErrorKind::Unknown, format!("build fetch client: {e}")))?;
        Ok(Self {
            client,
            user_agent: cfg.user_agent.clone(),
            max_body_bytes: cfg.max_body_bytes,
        })
    }

    fn classify_send_error(e: &reqwest::Error) -> ErrorKind {
        if e.is_timeout() {
            return ErrorKind::Timeout;
        }
        if e.is_connect() {
            // reqwest folds resolver failures into connect errors; the
            // message is the only discriminator left.
            let chain = format!("{e:?}").to_ascii_lowercase();
            if chain.contains("dns") || chain.contains("lookup") || chain.contains("resolve") {
                return ErrorKind::Dns;
            }
            return ErrorKind::Connection;
        }
        ErrorKind::Unknown
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &Url, opts: &FetchOptions) -> Result<PageContent> {
        // The HTTP fallback has no renderer, so blocked resource types
        // never load anyway; they are accepted for interface parity.
        let started = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .timeout(opts.timeout)
            .header(USER_AGENT, &self.user_agent)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| {
                Error::new(
                    Self::classify_send_error(&e),
                    format!("fetch {url} failed: {e}"),
                )
            })?;

        let http_status = response.status().as_u16();

        let mut stream = response.bytes_stream();
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                Error::new(ErrorKind::Connection, format!("body read for {url}: {e}"))
            })?;
            if body.len() + chunk.len() > self.max_body_bytes {
                body.truncate(self.max_body_bytes);
                tracing::warn!(url = %url, cap = self.max_body_bytes, "response body capped");
                break;
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body).into_owned();
        let text = html_to_text(&html);
        let title = extract_title(&html);

        Ok(PageContent {
            html,
            text,
            title,
            http_status,
            duration: started.elapsed(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTML extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "article", "section", "header",
    "footer", "blockquote", "table",
];

/// Strip tags and script/style bodies, turn block boundaries into
/// newlines, decode the common entities, collapse whitespace.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 4);
    let mut rest = html;
    let mut skip_until: Option<&str> = None;

    while let Some(open) = rest.find('<') {
        if skip_until.is_none() {
            out.push_str(&rest[..open]);
        }
        rest = &rest[open..];
        let close = match rest.find('>') {
            Some(idx) => idx,
            None => break, // unterminated tag, drop the tail
        };
        let tag_body = rest[1..close].trim();
        let tag_name: String = tag_body
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match skip_until {
            Some(awaiting) => {
                if tag_body.starts_with('/') && tag_name == awaiting {
                    skip_until = None;
                }
            }
            None => {
                if tag_name == "script" || tag_name == "style" {
                    if !tag_body.ends_with('/') {
                        skip_until = Some(if tag_name == "script" { "script" } else { "style" });
                    }
                } else if tag_name == "br"
                    || (tag_body.starts_with('/') && BLOCK_TAGS.contains(&tag_name.as_str()))
                {
                    out.push('\n');
                }
            }
        }
        rest = &rest[close + 1..];
    }
    if skip_until.is_none() {
        out.push_str(rest);
    }

    let decoded = decode_entities(&out);

    let mut result = String::with_capacity(decoded.len());
    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            result.push_str(&collapsed);
            result.push('\n');
        }
    }
    result.trim_end().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Pull the first `<title>` body, trimmed; `None` when absent or empty.
pub fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let after_open = open + lower[open..].find('>')? + 1;
    let close = after_open + lower[after_open..].find("</title")?;
    let title = decode_entities(html.get(after_open..close)?)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!title.is_empty()).then_some(title)
}
