use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `INNKEEP_*` environment variables.
/// Unset or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub pending_ttl_secs: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let data_dir = PathBuf::from(lookup("INNKEEP_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let upload_dir = lookup("INNKEEP_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploads"));

        Self {
            port: parsed(&lookup, "INNKEEP_PORT").unwrap_or(5433),
            bind: lookup("INNKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir,
            upload_dir,
            password: lookup("INNKEEP_PASSWORD").unwrap_or_else(|| "innkeep".into()),
            max_connections: parsed(&lookup, "INNKEEP_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "INNKEEP_COMPACT_THRESHOLD").unwrap_or(1000),
            pending_ttl_secs: parsed(&lookup, "INNKEEP_PENDING_TTL_SECS").unwrap_or(1800),
            tls_cert: lookup("INNKEEP_TLS_CERT"),
            tls_key: lookup("INNKEEP_TLS_KEY"),
            metrics_port: parsed(&lookup, "INNKEEP_METRICS_PORT"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }

    pub fn pending_ttl_ms(&self) -> i64 {
        i64::try_from(self.pending_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}
