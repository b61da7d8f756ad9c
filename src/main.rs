//! Otakon Cache
//!
//! Command-line front end and daemon for the unified cache.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         otakon-cache                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Memory    │───▶│    Local     │───▶│    Remote    │       │
//! │  │    (LRU)     │    │   (quota)    │    │   (per-user) │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          ▲ promote          ▲ migrate / reconcile               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use otakon_cache::adapters::{HttpRemoteConfig, HttpRemoteStore};
use otakon_cache::cache::{ContentType, Invalidation, MetricsSnapshot, TierSnapshot};
use otakon_cache::config::CacheOptions;
use otakon_cache::domain::{Tier, TierStore};
use otakon_cache::service::CacheService;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Otakon Cache - multi-tier cache with migration and offline sync
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "OTAKON_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of the local tier (overrides the file)
    #[arg(long, env = "OTAKON_LOCAL_DIR")]
    local_dir: Option<PathBuf>,

    /// Remote store REST endpoint (overrides the file)
    #[arg(long, env = "OTAKON_REMOTE_URL")]
    remote_url: Option<String>,

    /// Bearer token for the remote store
    #[arg(long, env = "OTAKON_REMOTE_TOKEN", hide_env_values = true)]
    remote_token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run auto-sync and serve metrics and health endpoints until Ctrl-C
    Serve {
        /// User whose session to run
        #[arg(long)]
        user: Option<String>,

        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
        metrics_addr: String,

        /// Health server bind address
        #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
        health_addr: String,
    },

    /// Read a value
    Get {
        key: String,
        #[command(flatten)]
        content: ContentArg,
        /// Fall back to a similar cached query
        #[arg(long)]
        similar: bool,
    },

    /// Write a JSON value
    Set {
        key: String,
        /// JSON document (bare strings are stored as JSON strings)
        value: String,
        #[command(flatten)]
        content: ContentArg,
    },

    /// Remove a key, or every key under a prefix, from all tiers
    Invalidate {
        /// Key, or prefix with --prefix
        target: String,
        /// Treat the target as a prefix
        #[arg(long)]
        prefix: bool,
        /// Only touch the tiers this content type may live in
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Upload device-only entries for a user
    Migrate {
        #[arg(long)]
        user: String,
    },

    /// Reconcile local and remote tiers for a user
    Reconcile {
        #[arg(long)]
        user: String,
    },
}

#[derive(ClapArgs, Debug)]
struct ContentArg {
    /// Content type tag (daily_news, global_content, game_help, ai_response, default)
    #[arg(long, default_value = "default")]
    content_type: String,
}

impl ContentArg {
    fn resolve(&self) -> ContentType {
        parse_content_type(&self.content_type)
    }
}

fn parse_content_type(tag: &str) -> ContentType {
    tag.parse().unwrap_or_else(|e| {
        warn!(error = %e, "Using the default content type");
        ContentType::Default
    })
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let options = load_options(&args)?;
    let service = Arc::new(CacheService::from_options(options).await?);

    match &args.command {
        Command::Serve {
            user,
            metrics_addr,
            health_addr,
        } => serve(&args, service, user.as_deref(), metrics_addr, health_addr).await?,

        Command::Get {
            key,
            content,
            similar,
        } => {
            let cache = service.cache();
            let value = if *similar {
                cache.get_similar(key, content.resolve()).await?
            } else {
                cache.get(key, content.resolve()).await?
            };
            match value {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    info!(key = %key, "Cache miss");
                    std::process::exit(1);
                }
            }
        }

        Command::Set {
            key,
            value,
            content,
        } => {
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            service.cache().set(key, value, content.resolve()).await?;
            service.cache().flush().await;
        }

        Command::Invalidate {
            target,
            prefix,
            content_type,
        } => {
            let target = if *prefix {
                Invalidation::Prefix(target.clone())
            } else {
                Invalidation::Key(target.clone())
            };
            let content_type = content_type.as_deref().map(parse_content_type);
            let removed = service.cache().invalidate(target, content_type).await?;
            println!("{}", removed);
        }

        Command::Migrate { user } => {
            let remote = build_remote(&args, service.options(), user)?;
            service.cache().attach_remote(remote.clone());
            let migrator = service
                .migrator()
                .context("migration needs local storage enabled")?;
            let record = migrator
                .start_migration(user, remote, CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            record.ensure_clean()?;
        }

        Command::Reconcile { user } => {
            let remote = build_remote(&args, service.options(), user)?;
            let reconciler = service
                .reconciler()
                .context("reconciliation needs local storage enabled")?;
            let state = reconciler.reconcile(user, remote).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}

fn load_options(args: &Args) -> anyhow::Result<CacheOptions> {
    let mut options = match &args.config {
        Some(path) => CacheOptions::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheOptions::default(),
    };

    if let Some(dir) = &args.local_dir {
        options.local_dir = Some(dir.clone());
    }
    if let Some(url) = &args.remote_url {
        options.remote_url = Some(url.clone());
    }
    Ok(options)
}

fn build_remote(
    args: &Args,
    options: &CacheOptions,
    user: &str,
) -> anyhow::Result<Arc<dyn TierStore>> {
    let base_url = options.require_remote_url()?.to_string();
    let token = args
        .remote_token
        .clone()
        .context("--remote-token or OTAKON_REMOTE_TOKEN is required")?;

    let config = HttpRemoteConfig {
        base_url,
        api_key: options.remote_api_key.clone(),
        ..Default::default()
    };
    Ok(Arc::new(HttpRemoteStore::new(config, user, token)?))
}

async fn serve(
    args: &Args,
    service: Arc<CacheService>,
    user: Option<&str>,
    metrics_addr: &str,
    health_addr: &str,
) -> anyhow::Result<()> {
    info!("Starting Otakon cache daemon");
    info!("  Remote store: {}", service.options().use_remote_store);
    info!("  Auto sync: {}", service.options().auto_sync);
    info!(
        "  Sync interval: {} seconds",
        service.options().sync_interval_secs
    );

    if let Some(user) = user {
        let remote = build_remote(args, service.options(), user)?;
        if let Some(record) = service.authenticate(user, remote).await? {
            info!(
                status = %record.status,
                migrated = record.migrated_item_count,
                failed = record.failed_keys.len(),
                "Migration finished"
            );
        }
    } else {
        warn!("No --user given, running without a remote session");
    }

    // Start health server
    let health_addr = health_addr.to_string();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = metrics_addr.to_string();
    let metrics_service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_service).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down");
    service.logout().await;
    service.cache().flush().await;

    info!("Daemon shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

// =============================================================================
// HTTP helpers
// =============================================================================

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn bind(addr: &str, name: &str) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid {} server address", name))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} server", name))?;
    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let listener = bind(addr, "Health").await?;
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Health server accept error")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Encode a counter snapshot in the Prometheus text format
fn render_metrics(snapshot: &MetricsSnapshot) -> prometheus::Result<Vec<u8>> {
    let registry = Registry::new_custom(Some("otakon_cache".to_string()), None)?;

    let per_tier: [(&str, &str, fn(&TierSnapshot) -> u64); 5] = [
        ("tier_hits", "Reads served by a tier", |t| t.hits),
        ("tier_misses", "Reads a tier could not serve", |t| t.misses),
        ("tier_errors", "Tier operations that failed", |t| t.errors),
        ("tier_evictions", "Entries evicted from a tier", |t| t.evictions),
        ("tier_write_failures", "Background writes that failed", |t| t.write_failures),
    ];
    for (name, help, value) in per_tier {
        let gauge = IntGaugeVec::new(Opts::new(name, help), &["tier"])?;
        for tier in Tier::ALL {
            gauge
                .with_label_values(&[tier.as_str()])
                .set(value(snapshot.tier(tier)) as i64);
        }
        registry.register(Box::new(gauge))?;
    }

    let totals = [
        ("full_misses", "Reads that missed every tier", snapshot.full_misses),
        ("stale_reads", "Expired entries found on read", snapshot.stale_reads),
        ("promotions", "Entries copied to faster tiers", snapshot.promotions),
        ("similar_hits", "Reads served by a similar query", snapshot.similar_hits),
        ("invalidations", "Keys removed by invalidation", snapshot.invalidations),
        ("migrations_completed", "Completed migrations", snapshot.migrations_completed),
        ("migrated_items", "Entries uploaded by migrations", snapshot.migrated_items),
        ("migration_failures", "Entries migrations failed to upload", snapshot.migration_failures),
        ("reconciliations", "Finished reconciliation passes", snapshot.reconciliations),
        ("sync_conflicts", "Keys changed on both sides", snapshot.sync_conflicts),
        ("sync_cancellations", "Cancelled reconciliation passes", snapshot.sync_cancellations),
    ];
    for (name, help, value) in totals {
        let gauge = IntGauge::new(name, help)?;
        gauge.set(value as i64);
        registry.register(Box::new(gauge))?;
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

async fn run_metrics_server(addr: &str, service: Arc<CacheService>) -> anyhow::Result<()> {
    let listener = bind(addr, "Metrics").await?;
    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Metrics server accept error")?;

        let io = TokioIo::new(stream);
        let service = service.clone();

        tokio::spawn(async move {
            let handler = service_fn(move |req: Request<hyper::body::Incoming>| {
                let service = service.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match render_metrics(&service.cache().metrics().snapshot()) {
                            Ok(buffer) => {
                                let mut response = text_response(StatusCode::OK, buffer);
                                if let Ok(value) = TextEncoder::new().format_type().parse::<hyper::header::HeaderValue>() {
                                    response
                                        .headers_mut()
                                        .insert(hyper::header::CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error")
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otakon_cache::cache::CacheMetrics;

    #[test]
    fn test_render_metrics_labels_tiers() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(Tier::Local);
        metrics.record_full_miss();

        let text = String::from_utf8(render_metrics(&metrics.snapshot()).unwrap()).unwrap();
        assert!(text.contains("otakon_cache_tier_hits{tier=\"local\"} 1"));
        assert!(text.contains("otakon_cache_tier_hits{tier=\"memory\"} 0"));
        assert!(text.contains("otakon_cache_full_misses 1"));
    }

    #[test]
    fn test_content_type_fallback() {
        assert_eq!(parse_content_type("game_help"), ContentType::GameHelp);
        assert_eq!(parse_content_type("weather"), ContentType::Default);
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from([
            "otakon-cache",
            "--log-json",
            "invalidate",
            "game:",
            "--prefix",
        ])
        .unwrap();
        assert!(args.log_json);
        assert!(matches!(
            args.command,
            Command::Invalidate { prefix: true, .. }
        ));
    }
}
