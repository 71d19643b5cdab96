use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::{
    errors::{FixityError, FixityResult},
    models::state::{RestoreRequest, RestoreTier},
    services::checksum::DEFAULT_CHUNK_SIZE,
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Delay before an emulated archive restore becomes readable.
    pub restore_delay: Duration,
    pub fixity: FixityConfig,
}

/// Settings the fixity steps consult, handed to each component at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixityConfig {
    pub restore_days: u32,
    pub restore_tier: RestoreTier,
    pub chunk_size: u64,
    pub store_checksum_on_tagging: bool,
    pub notification_topic: Option<String>,
    pub anonymous_usage: bool,
    pub solution_id: Option<String>,
    pub metrics_uuid: Option<String>,
}

impl Default for FixityConfig {
    fn default() -> Self {
        Self {
            restore_days: 1,
            restore_tier: RestoreTier::Bulk,
            chunk_size: DEFAULT_CHUNK_SIZE,
            store_checksum_on_tagging: true,
            notification_topic: None,
            anonymous_usage: false,
            solution_id: None,
            metrics_uuid: None,
        }
    }
}

impl FixityConfig {
    pub fn validate(&self) -> FixityResult<()> {
        if self.restore_days == 0 {
            return Err(FixityError::Configuration(
                "restore days must be positive".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(FixityError::Configuration(
                "chunk size must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn restore_request(&self) -> RestoreRequest {
        RestoreRequest {
            days: self.restore_days,
            tier: self.restore_tier,
        }
    }

    /// Usage metrics go out only when opted in and both ids are known.
    pub fn metrics_enabled(&self) -> bool {
        self.anonymous_usage && self.solution_id.is_some() && self.metrics_uuid.is_some()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked resumable fixity checker for tiered object storage")]
pub struct Args {
    /// Host to bind to (overrides FIXITY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FIXITY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides FIXITY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FIXITY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds before an emulated restore completes (overrides FIXITY_RESTORE_DELAY_SECS)
    #[arg(long)]
    pub restore_delay_secs: Option<u64>,

    /// Days a restored copy stays readable (overrides FIXITY_RESTORE_DAYS)
    #[arg(long)]
    pub restore_days: Option<u32>,

    /// Expedited, Standard or Bulk (overrides FIXITY_RESTORE_TIER)
    #[arg(long)]
    pub restore_tier: Option<String>,

    /// Bytes hashed per invocation (overrides FIXITY_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Store computed checksums as object tags (overrides FIXITY_STORE_CHECKSUM_ON_TAGGING)
    #[arg(long)]
    pub store_checksum_on_tagging: Option<bool>,

    /// Notification topic (overrides FIXITY_NOTIFICATION_TOPIC)
    #[arg(long)]
    pub notification_topic: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables `lookup` yields over built-in defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let defaults = FixityConfig::default();

        let env_host = lookup("FIXITY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = env_parsed(&lookup, "FIXITY_PORT")?.unwrap_or(3000);
        let env_storage =
            lookup("FIXITY_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("FIXITY_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/fixity.db".into());
        let env_delay = env_parsed(&lookup, "FIXITY_RESTORE_DELAY_SECS")?.unwrap_or(60);
        let env_days =
            env_parsed(&lookup, "FIXITY_RESTORE_DAYS")?.unwrap_or(defaults.restore_days);
        let env_chunk = env_parsed(&lookup, "FIXITY_CHUNK_SIZE")?.unwrap_or(defaults.chunk_size);

        let restore_tier = match args.restore_tier.or_else(|| lookup("FIXITY_RESTORE_TIER")) {
            Some(raw) => raw
                .parse::<RestoreTier>()
                .map_err(|err| FixityError::Configuration(err.to_string()))?,
            None => defaults.restore_tier,
        };

        let store_checksum_on_tagging = match args.store_checksum_on_tagging {
            Some(flag) => flag,
            None => match lookup("FIXITY_STORE_CHECKSUM_ON_TAGGING") {
                Some(raw) => parse_flag("FIXITY_STORE_CHECKSUM_ON_TAGGING", &raw)?,
                None => defaults.store_checksum_on_tagging,
            },
        };

        let anonymous_usage = match lookup("FIXITY_ANONYMOUS_USAGE") {
            Some(raw) => parse_flag("FIXITY_ANONYMOUS_USAGE", &raw)?,
            None => defaults.anonymous_usage,
        };

        let fixity = FixityConfig {
            restore_days: args.restore_days.unwrap_or(env_days),
            restore_tier,
            chunk_size: args.chunk_size.unwrap_or(env_chunk),
            store_checksum_on_tagging,
            notification_topic: args
                .notification_topic
                .or_else(|| lookup("FIXITY_NOTIFICATION_TOPIC"))
                .filter(|topic| !topic.is_empty()),
            anonymous_usage,
            solution_id: lookup("FIXITY_SOLUTION_ID"),
            metrics_uuid: lookup("FIXITY_METRICS_UUID"),
        };
        fixity.validate()?;

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            restore_delay: Duration::from_secs(args.restore_delay_secs.unwrap_or(env_delay)),
            fixity,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}

/// Accepts the spellings deployment templates tend to use.
fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" | "" => Ok(false),
        other => Err(FixityError::Configuration(format!(
            "{name} must be yes or no, got `{other}`"
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_input() {
        let (cfg, migrate) = AppConfig::resolve(Args::default(), lookup_from(&[])).unwrap();
        assert!(!migrate);
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.fixity, FixityConfig::default());
        assert_eq!(cfg.fixity.chunk_size, 20 * 1024 * 1024 * 1024);
        assert_eq!(cfg.restore_delay, Duration::from_secs(60));
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(8080),
            restore_tier: Some("expedited".into()),
            chunk_size: Some(4096),
            ..Args::default()
        };
        let lookup = lookup_from(&[
            ("FIXITY_PORT", "9000"),
            ("FIXITY_RESTORE_TIER", "Standard"),
            ("FIXITY_RESTORE_DAYS", "3"),
            ("FIXITY_ANONYMOUS_USAGE", "Yes"),
            ("FIXITY_SOLUTION_ID", "SO0000"),
            ("FIXITY_METRICS_UUID", "1234"),
        ]);
        let (cfg, _) = AppConfig::resolve(args, lookup).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.fixity.restore_tier, RestoreTier::Expedited);
        assert_eq!(cfg.fixity.restore_days, 3);
        assert_eq!(cfg.fixity.chunk_size, 4096);
        assert!(cfg.fixity.metrics_enabled());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(AppConfig::resolve(Args::default(), lookup_from(&[("FIXITY_PORT", "http")])).is_err());
        assert!(
            AppConfig::resolve(Args::default(), lookup_from(&[("FIXITY_RESTORE_TIER", "Fast")]))
                .is_err()
        );
        assert!(
            AppConfig::resolve(Args::default(), lookup_from(&[("FIXITY_CHUNK_SIZE", "0")]))
                .is_err()
        );
        assert!(
            AppConfig::resolve(
                Args::default(),
                lookup_from(&[("FIXITY_ANONYMOUS_USAGE", "maybe")])
            )
            .is_err()
        );
    }
}
