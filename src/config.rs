use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::registry::{CatalogError, DEFAULT_CATALOG, HallRegistry};
use crate::resolver::LockPolicy;

/// Server settings, read from `HALLBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// WAL directory. `None` keeps the ledger in memory.
    pub data_dir: Option<PathBuf>,
    pub halls: HallRegistry,
    pub lock_policy: LockPolicy,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Catalog(CatalogError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::Catalog(e) => write!(f, "invalid HALLBOOK_HALLS: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Catalog(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<CatalogError> for ConfigError {
    fn from(e: CatalogError) -> Self {
        ConfigError::Catalog(e)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn optional<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let catalog = lookup("HALLBOOK_HALLS").unwrap_or_else(|| DEFAULT_CATALOG.to_string());
        let timeout_ms: u64 = parsed(&lookup, "HALLBOOK_LOCK_TIMEOUT_MS", 5000)?;

        let max_connections: usize = parsed(&lookup, "HALLBOOK_MAX_CONNECTIONS", 256)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "HALLBOOK_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }

        Ok(Self {
            bind: lookup("HALLBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "HALLBOOK_PORT", 7878)?,
            data_dir: lookup("HALLBOOK_DATA_DIR")
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
            halls: HallRegistry::parse(&catalog)?,
            lock_policy: LockPolicy {
                timeout: Duration::from_millis(timeout_ms),
                attempts: parsed(&lookup, "HALLBOOK_LOCK_ATTEMPTS", 1)?,
            },
            max_connections,
            compact_threshold: parsed(&lookup, "HALLBOOK_COMPACT_THRESHOLD", 1000)?,
            metrics_port: optional(&lookup, "HALLBOOK_METRICS_PORT")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("bookings.wal"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = assert_ok!(config(&[]));
        assert_eq!(c.addr(), "0.0.0.0:7878");
        assert!(c.data_dir.is_none());
        assert!(c.wal_path().is_none());
        assert_eq!(c.halls.len(), 6);
        assert_eq!(c.lock_policy, LockPolicy::default());
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert!(c.metrics_port.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let c = assert_ok!(config(&[
            ("HALLBOOK_BIND", "127.0.0.1"),
            ("HALLBOOK_PORT", "9000"),
            ("HALLBOOK_DATA_DIR", "/var/lib/hallbook"),
            ("HALLBOOK_HALLS", "Main:400, Annex:40"),
            ("HALLBOOK_LOCK_TIMEOUT_MS", "250"),
            ("HALLBOOK_LOCK_ATTEMPTS", "3"),
            ("HALLBOOK_METRICS_PORT", "9100"),
        ]));
        assert_eq!(c.addr(), "127.0.0.1:9000");
        assert_eq!(c.wal_path(), Some(PathBuf::from("/var/lib/hallbook/bookings.wal")));
        assert_eq!(c.halls.capacity_of("Main"), Some(400));
        assert!(!c.halls.contains("A"));
        assert_eq!(c.lock_policy.timeout, Duration::from_millis(250));
        assert_eq!(c.lock_policy.attempts, 3);
        assert_eq!(c.metrics_port, Some(9100));
    }

    #[test]
    fn malformed_values_are_errors() {
        assert_eq!(
            assert_err!(config(&[("HALLBOOK_PORT", "http")])),
            ConfigError::Invalid {
                var: "HALLBOOK_PORT",
                value: "http".into(),
            }
        );
        assert_err!(config(&[("HALLBOOK_LOCK_TIMEOUT_MS", "-5")]));
        assert_err!(config(&[("HALLBOOK_MAX_CONNECTIONS", "0")]));
        assert!(matches!(
            config(&[("HALLBOOK_HALLS", "A:0")]),
            Err(ConfigError::Catalog(_))
        ));
    }

    #[test]
    fn blank_data_dir_means_in_memory() {
        let c = assert_ok!(config(&[("HALLBOOK_DATA_DIR", "  ")]));
        assert!(c.data_dir.is_none());
    }
}
