mod file_config;

pub use file_config::FileConfig;

use crate::analytics::AnalyticsConfig;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub cache_ttl_secs: u64,
    pub trending_cache_ttl_secs: u64,
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub analytics: AnalyticsConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be given as an argument or in the config file")
            })?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port == metrics_port {
            bail!("port and metrics_port must differ, both are {}", port);
        }

        let logging_level = match file.logging_level {
            Some(s) => parse_logging_level(&s)
                .ok_or_else(|| anyhow::anyhow!("unknown logging_level in config: {}", s))?,
            None => cli.logging_level.clone(),
        };

        let weights = file.weights.unwrap_or_default();
        weights
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid weights in config: {}", e))?;

        let analytics = AnalyticsConfig {
            cache_ttl: Duration::from_secs(file.cache_ttl_secs.unwrap_or(cli.cache_ttl_secs)),
            trending_cache_ttl: Duration::from_secs(
                file.trending_cache_ttl_secs
                    .unwrap_or(cli.trending_cache_ttl_secs),
            ),
            query_timeout: Duration::from_secs(
                file.query_timeout_secs.unwrap_or(cli.query_timeout_secs),
            ),
            default_weights: weights,
        };

        Ok(Self {
            db_path,
            port,
            metrics_port,
            logging_level,
            analytics,
        })
    }
}

fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> CliConfig {
        CliConfig {
            db_path: Some(PathBuf::from("cli.db")),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            cache_ttl_secs: 3600,
            trending_cache_ttl_secs: 1800,
            query_timeout_secs: 10,
        }
    }

    #[test]
    fn test_cli_only_resolution() {
        let config = AppConfig::resolve(&cli(), None).unwrap();
        assert_eq!(config.db_path, PathBuf::from("cli.db"));
        assert_eq!(config.port, 3001);
        assert_eq!(config.analytics.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.analytics.default_weights.views, 20.0);
    }

    #[test]
    fn test_file_overrides_cli() {
        let file = FileConfig {
            port: Some(4000),
            cache_ttl_secs: Some(60),
            logging_level: Some("headers".to_string()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli(), Some(file)).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.analytics.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
    }

    #[test]
    fn test_db_path_is_required() {
        let no_db = CliConfig {
            db_path: None,
            ..cli()
        };
        assert!(AppConfig::resolve(&no_db, None).is_err());
    }

    #[test]
    fn test_colliding_ports_rejected() {
        let file = FileConfig {
            metrics_port: Some(3001),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli(), Some(file)).is_err());
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let file = FileConfig {
            weights: Some(crate::ranking::RankingWeights {
                views: -3.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli(), Some(file)).is_err());
    }
}
