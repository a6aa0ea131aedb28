use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vortex_analytics_server::analytics::AnalyticsService;
use vortex_analytics_server::config::{AppConfig, CliConfig, FileConfig};
use vortex_analytics_server::curation::NoopCurationAdapter;
use vortex_analytics_server::metrics_store::SqliteMetricsStore;
use vortex_analytics_server::server::{self, run_server, RequestsLoggingLevel};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite analytics database file.
    #[clap(value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Values there override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Seconds a computed query result stays cached.
    #[clap(long, default_value_t = 3600)]
    pub cache_ttl_secs: u64,

    /// Seconds a trending result stays cached.
    #[clap(long, default_value_t = 1800)]
    pub trending_cache_ttl_secs: u64,

    /// Seconds before a ranking computation gives up.
    #[clap(long, default_value_t = 10)]
    pub query_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path,
        port: cli_args.port,
        metrics_port: cli_args.metrics_port,
        logging_level: cli_args.logging_level,
        cache_ttl_secs: cli_args.cache_ttl_secs,
        trending_cache_ttl_secs: cli_args.trending_cache_ttl_secs,
        query_timeout_secs: cli_args.query_timeout_secs,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening SQLite analytics database at {:?}...", config.db_path);
    let store = Arc::new(SqliteMetricsStore::new(&config.db_path)?);

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let service = Arc::new(AnalyticsService::new(
        store,
        Arc::new(NoopCurationAdapter),
        config.analytics,
    ));

    info!("Ready to serve at port {}!", config.port);
    info!("Metrics available at port {}!", config.metrics_port);
    run_server(
        service,
        config.logging_level,
        config.port,
        config.metrics_port,
    )
    .await
}
