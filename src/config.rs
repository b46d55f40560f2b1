use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read once from `SPACEBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub bucket_minutes: u32,
    pub request_timeout: Duration,
    /// JSON layout of floors, entities and users.
    pub seed: Option<PathBuf>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "spacebook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            bucket_minutes: 15,
            request_timeout: Duration::from_millis(5000),
            seed: None,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        Self {
            port: parse_or(&lookup, "SPACEBOOK_PORT", d.port),
            bind: lookup("SPACEBOOK_BIND").unwrap_or(d.bind),
            data_dir: lookup("SPACEBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("SPACEBOOK_PASSWORD").unwrap_or(d.password),
            max_connections: parse_or(&lookup, "SPACEBOOK_MAX_CONNECTIONS", d.max_connections),
            compact_threshold: parse_or(&lookup, "SPACEBOOK_COMPACT_THRESHOLD", d.compact_threshold),
            bucket_minutes: parse_or(&lookup, "SPACEBOOK_BUCKET_MINUTES", d.bucket_minutes).max(1),
            request_timeout: parsed("SPACEBOOK_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.request_timeout),
            seed: lookup("SPACEBOOK_SEED").map(PathBuf::from),
            tls_cert: lookup("SPACEBOOK_TLS_CERT"),
            tls_key: lookup("SPACEBOOK_TLS_KEY"),
            metrics_port: lookup("SPACEBOOK_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = from_pairs(&[]);
        assert_eq!(cfg.addr(), "0.0.0.0:5433");
        assert_eq!(cfg.bucket_minutes, 15);
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert!(cfg.seed.is_none());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/bookings.wal"));
    }

    #[test]
    fn overrides() {
        let cfg = from_pairs(&[
            ("SPACEBOOK_PORT", "6000"),
            ("SPACEBOOK_BUCKET_MINUTES", "30"),
            ("SPACEBOOK_REQUEST_TIMEOUT_MS", "250"),
            ("SPACEBOOK_SEED", "/etc/spacebook/layout.json"),
            ("SPACEBOOK_METRICS_PORT", "9100"),
        ]);
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.bucket_minutes, 30);
        assert_eq!(cfg.request_timeout, Duration::from_millis(250));
        assert_eq!(cfg.seed, Some(PathBuf::from("/etc/spacebook/layout.json")));
        assert_eq!(cfg.metrics_port, Some(9100));
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = from_pairs(&[("SPACEBOOK_PORT", "lots"), ("SPACEBOOK_BUCKET_MINUTES", "0")]);
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.bucket_minutes, 1);
    }
}
