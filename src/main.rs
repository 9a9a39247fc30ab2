//! Cachewright CLI
//!
//! Loads a YAML cache settings file and builds every declared site.
//!
//! ```text
//! cachewright check --config cachewright.yaml
//! cachewright serve --config cachewright.yaml --metrics-addr 0.0.0.0:9464
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cachewright::cache::render_tree;
use cachewright::config::{CacheSettings, ConfigMap, MethodSignature, SiteConfig};
use cachewright::context::CacheContext;
use cachewright::provider::DefaultConfigProvider;
use cachewright::PrometheusMonitorManager;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Cachewright - declarative cache construction engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build every declared site and print its tier tree
    Check {
        /// Cache settings file (YAML)
        #[arg(long, env = "CACHEWRIGHT_CONFIG")]
        config: PathBuf,
    },
    /// Build every site, then serve metrics and run background refresh
    Serve {
        /// Cache settings file (YAML)
        #[arg(long, env = "CACHEWRIGHT_CONFIG")]
        config: PathBuf,

        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9464")]
        metrics_addr: String,

        /// Refresh scheduler tick in milliseconds
        #[arg(
            long,
            env = "REFRESH_INTERVAL_MS",
            default_value = "1000",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        refresh_interval_ms: u64,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    match args.command {
        Command::Check { config } => check(&config),
        Command::Serve {
            config,
            metrics_addr,
            refresh_interval_ms,
        } => serve(&config, &metrics_addr, Duration::from_millis(refresh_interval_ms)).await,
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let settings = load_settings(path)?;
    let context = CacheContext::new(
        Arc::new(DefaultConfigProvider::new()),
        Arc::new(settings.to_global_config()),
    );
    let sites = settings.to_site_configs()?;

    for (method, site) in build_sites(&context, &settings, &sites)? {
        if let Some(cache) = site.resolved_cache() {
            println!("{} [{}] {}/{}", method, site.kind().label(), site.area(), site.name().unwrap_or("-"));
            print!("{}", render_tree(&cache));
        }
    }
    Ok(())
}

async fn serve(path: &Path, metrics_addr: &str, refresh_interval: Duration) -> anyhow::Result<()> {
    let settings = load_settings(path)?;
    let monitor = Arc::new(PrometheusMonitorManager::new()?);
    let provider = DefaultConfigProvider::new().with_monitor(monitor.clone());
    let context = CacheContext::new(Arc::new(provider), Arc::new(settings.to_global_config()));

    let sites = settings.to_site_configs()?;
    let built = build_sites(&context, &settings, &sites)?;
    info!(sites = built.len(), monitored = monitor.monitored().len(), "Caches built");

    let token = CancellationToken::new();

    let scheduler = Arc::clone(context.refresh_scheduler());
    let scheduler_handle = tokio::spawn(scheduler.run(refresh_interval, token.clone()));

    let addr: SocketAddr = metrics_addr
        .parse()
        .with_context(|| format!("Invalid metrics server address: {}", metrics_addr))?;
    let server_token = token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(addr, monitor, server_token).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    token.cancel();

    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Refresh scheduler task failed");
    }
    if let Err(e) = server_handle.await {
        warn!(error = %e, "Metrics server task failed");
    }
    info!("Shutdown complete");
    Ok(())
}

fn load_settings(path: &Path) -> anyhow::Result<CacheSettings> {
    let settings = CacheSettings::from_file(path)
        .with_context(|| format!("Failed to load cache settings from {}", path.display()))?;
    info!(
        path = %path.display(),
        local_areas = settings.local.len(),
        remote_areas = settings.remote.len(),
        sites = settings.sites.len(),
        "Loaded cache settings"
    );
    Ok(settings)
}

/// Resolve every declared site through one invocation context
fn build_sites<'a>(
    context: &Arc<CacheContext>,
    settings: &CacheSettings,
    sites: &'a [(MethodSignature, Arc<SiteConfig>)],
) -> anyhow::Result<Vec<(&'a MethodSignature, &'a Arc<SiteConfig>)>> {
    let config_map = ConfigMap::new();
    for (method, site) in sites {
        config_map.register(method, Arc::clone(site));
    }
    let invoke = context.create_invoke_context(Arc::new(config_map));

    let mut built = Vec::with_capacity(sites.len());
    for (method, site) in sites {
        let call = invoke.new_call(method.clone(), settings.hidden_packages.clone());
        call.resolve_cache(site)
            .with_context(|| format!("Failed to build cache for {}", method))?;
        built.push((method, site));
    }
    Ok(built)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: SocketAddr,
    monitor: Arc<PrometheusMonitorManager>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn handler(
        req: Request<hyper::body::Incoming>,
        monitor: Arc<PrometheusMonitorManager>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match monitor.encode_text() {
                Ok(text) => {
                    let mut response = respond(StatusCode::OK, text);
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                }
            },
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted.context("Metrics server accept error")?,
        };

        let io = TokioIo::new(stream);
        let monitor = Arc::clone(&monitor);

        tokio::spawn(async move {
            let service = service_fn(move |req| handler(req, Arc::clone(&monitor)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_refresh_interval_rejected() {
        let result = Args::try_parse_from([
            "cachewright",
            "serve",
            "--config",
            "cachewright.yaml",
            "--refresh-interval-ms",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_serve_defaults() {
        let args = Args::try_parse_from(["cachewright", "serve", "--config", "cachewright.yaml"]).unwrap();
        match args.command {
            Command::Serve {
                metrics_addr,
                refresh_interval_ms,
                ..
            } => {
                assert_eq!(metrics_addr, "0.0.0.0:9464");
                assert_eq!(refresh_interval_ms, 1000);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
