//! tiercache demo server
//!
//! Builds the two-tier cache over an in-memory L2, optionally seeds and warms
//! it, and serves Prometheus metrics until interrupted.
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────────┐    ┌──────────────────┐
//! │  ShardedCache│◀───│  TieredCacheManager  │───▶│ InMemory L2 tier │
//! │  + janitor   │    └──────────────────────┘    └──────────────────┘
//! └──────────────┘               │
//!                        /metrics, /healthz
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use prometheus::Registry;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{
    DistributedTier, InMemoryDistributedTier, JsonCodec, L2Tier, ProcessMemoryProbe,
    PrometheusMetrics, ShardedCache, TieredCacheManager, ValueCodec,
};
use tiercache::config::{parse_duration, CacheSettings};
use tiercache::{Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - two-tier cache demo server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML settings file; overrides the cache flags below
    #[arg(long, env = "TIERCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum L1 entries
    #[arg(long, env = "MAX_ENTRIES", default_value = "100000")]
    max_entries: usize,

    /// Number of L1 shards
    #[arg(long, env = "SHARD_COUNT", default_value = "256")]
    shard_count: usize,

    /// Interval between background sweeps (e.g. 30s, 1m)
    #[arg(long, env = "CLEANUP_INTERVAL", default_value = "60s")]
    cleanup_interval: String,

    /// TTL for L1 writes made by the manager
    #[arg(long, env = "L1_TTL", default_value = "60s")]
    l1_ttl: String,

    /// TTL for seeded L2 entries
    #[arg(long, env = "L2_TTL", default_value = "1h")]
    l2_ttl: String,

    /// Memory budget for the pressure sweep, in MiB. Without it usage is
    /// measured against total system memory and the sweep rarely fires.
    #[arg(long, env = "MEMORY_LIMIT_MB")]
    memory_limit_mb: Option<u64>,

    /// Number of demo keys to seed into L2
    #[arg(long, env = "SEED_KEYS", default_value = "0")]
    seed_keys: usize,

    /// Keys to warm into L1 at startup (comma separated)
    #[arg(long, env = "WARMUP_KEYS", value_delimiter = ',')]
    warmup_keys: Vec<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn settings(&self) -> Result<CacheSettings> {
        if let Some(path) = &self.config {
            return CacheSettings::load(path);
        }
        Ok(CacheSettings {
            max_entries: self.max_entries,
            shard_count: self.shard_count,
            cleanup_interval: self.cleanup_interval.clone(),
            l1_ttl: self.l1_ttl.clone(),
            ..Default::default()
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let settings = args.settings()?;
    let l1_config = settings.sharded_cache_config()?;
    let manager_config = settings.manager_config()?;
    let l2_ttl = parse_duration(&args.l2_ttl)?;

    info!("Starting tiercache");
    info!("  Max L1 entries: {}", l1_config.max_entries);
    info!("  Shards: {}", l1_config.shard_count);
    info!("  Cleanup interval: {:?}", l1_config.cleanup_interval);
    info!("  L1 TTL: {:?}", manager_config.l1_ttl);

    let registry = Arc::new(Registry::new());
    let metrics = Arc::new(
        PrometheusMetrics::register(&registry)
            .map_err(|e| Error::Config(format!("failed to register metrics: {}", e)))?,
    );

    let shutdown = CancellationToken::new();

    let l1 = Arc::new(ShardedCache::<Value>::with_metrics(l1_config, metrics.clone())?);
    let probe = match args.memory_limit_mb {
        Some(mb) => ProcessMemoryProbe::with_limit(mb.saturating_mul(1024 * 1024)),
        None => {
            info!("  Memory pressure measured against total system memory");
            ProcessMemoryProbe::new()
        }
    };
    l1.spawn_janitor(Arc::new(probe), &shutdown);

    let backend = Arc::new(InMemoryDistributedTier::new());
    seed(&backend, args.seed_keys, l2_ttl).await?;

    let l2 = Arc::new(L2Tier::with_metrics(
        backend.clone(),
        JsonCodec::<Value>::new(),
        metrics.clone(),
    ));
    let manager = TieredCacheManager::<Value>::builder()
        .tier(l1.clone())
        .tier(l2)
        .config(manager_config)
        .metrics(metrics)
        .build()?;

    if !args.warmup_keys.is_empty() {
        match manager.warmup(&shutdown, args.warmup_keys.iter().cloned()).await {
            Ok(report) => info!(warmed = report.warmed, requested = report.requested, "warmup complete"),
            Err(e) => warn!(error = %e, "warmup incomplete"),
        }
    }

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let server_registry = registry.clone();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, server_registry, server_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!("tiercache ready, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    shutdown.cancel();
    l1.shutdown().await;
    if let Err(e) = server.await {
        warn!("Metrics server task ended abnormally: {}", e);
    }

    let stats = l1.stats();
    info!(
        entries = stats.entries,
        hits = stats.hits,
        misses = stats.misses,
        evicted = stats.evicted,
        "tiercache shutdown complete"
    );
    Ok(())
}

/// Populate L2 with `count` demo documents named `demo-0`, `demo-1`, ...
async fn seed(backend: &InMemoryDistributedTier, count: usize, ttl: std::time::Duration) -> Result<()> {
    let codec = JsonCodec::<Value>::new();
    for i in 0..count {
        let key = format!("demo-{}", i);
        let payload = codec.encode(&json!({ "id": i, "key": key }))?;
        backend
            .set(&key, payload, ttl)
            .await
            .map_err(|e| Error::Config(format!("failed to seed {}: {}", key, e)))?;
    }
    if count > 0 {
        info!(count, "seeded L2");
    }
    Ok(())
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
    for directive in ["hyper=warn", "h2=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
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
    addr: &str,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use tokio::net::TcpListener;

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    fn handle(req: Request<hyper::body::Incoming>, registry: &Registry) -> Response<Full<Bytes>> {
        match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                    return respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
                }
                let mut response = respond(StatusCode::OK, buffer);
                if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                    response.headers_mut().insert(CONTENT_TYPE, content_type);
                }
                response
            }
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "ok"),
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        }
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };

        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let response = handle(req, &registry);
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}
