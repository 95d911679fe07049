use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vg_domain::config::{Config, ConfigSeverity};
use vg_gateway::api;
use vg_gateway::cli::{Cli, Command, ConfigCommand};
use vg_gateway::housekeeping;
use vg_gateway::state::AppState;
use vg_providers::{HttpGenerator, RetryingGenerator, TextGenerator};
use vg_scraper::{HttpFetcher, PageFetcher};
use vg_store::InMemoryRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = vg_gateway::cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = vg_gateway::cli::load_config(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                println!("{tag}: {issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration ok");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = vg_gateway::cli::load_config(&cli.config)?;
            match config.to_toml_string() {
                Some(rendered) => println!("{rendered}"),
                None => anyhow::bail!("configuration is not serializable"),
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("vantage {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vg_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Vantage starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Collaborators ────────────────────────────────────────────────
    // Repository: in-memory by default; a persistent backend plugs in
    // through the same trait.
    let repo = Arc::new(InMemoryRepository::new());
    tracing::info!("repository ready (in-memory)");

    let fetcher: Arc<dyn PageFetcher> = Arc::new(
        HttpFetcher::from_config(&config.scraper)
            .context("initializing page fetcher")?,
    );
    tracing::info!(user_agent = %config.scraper.user_agent, "page fetcher ready");

    let generator: Option<Arc<dyn TextGenerator>> =
        match HttpGenerator::from_config(&config.llm, config.pipeline.analysis_timeout())
            .context("initializing text generator")?
        {
            Some(http) => {
                let retrying = RetryingGenerator::new(
                    Arc::new(http),
                    config.llm.max_retries,
                    std::time::Duration::from_millis(config.llm.retry_backoff_ms),
                );
                tracing::info!(model = %config.llm.model, "text generator ready");
                Some(Arc::new(retrying))
            }
            None => {
                tracing::warn!(
                    "no llm.endpoint configured — every analysis will use the placeholder"
                );
                None
            }
        };

    // ── Service graph ────────────────────────────────────────────────
    let state = AppState::build(config.clone(), repo, fetcher, generator);
    tracing::info!(
        max_concurrent = config.coordinator.max_concurrent_processing,
        queue_workers = config.queue.workers,
        "service graph ready"
    );

    // ── Background loops: scheduler, queue workers, housekeeping ─────
    let _handles = housekeeping::spawn_all(&state);
    tracing::info!(
        tick_secs = config.scheduler.tick_secs,
        "scheduler and queue workers started"
    );

    // ── Router + layers ──────────────────────────────────────────────
    let cors = build_cors_layer(&config.server.cors_allowed_origins);
    let app = api::router()
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Vantage listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

fn build_cors_layer(allowed_origins: &[String]) -> tower_http::cors::CorsLayer {
    use axum::http::{header, HeaderValue, Method};
    use tower_http::cors::{AllowOrigin, CorsLayer};

    if allowed_origins.len() == 1 && allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
