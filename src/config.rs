use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Log output format selected by `RESERVD_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Server settings, read from `RESERVD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
    pub log_format: LogFormat,
    /// Variables that were set but could not be parsed. Logging is not up
    /// yet while the config loads, so the caller reports these.
    pub warnings: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            metrics_port: None,
            log_format: LogFormat::Compact,
            warnings: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut warnings = Vec::new();
        let port = parse_or(&lookup, &mut warnings, "RESERVD_PORT", defaults.port);
        let max_connections = parse_or(
            &lookup,
            &mut warnings,
            "RESERVD_MAX_CONNECTIONS",
            defaults.max_connections,
        );
        let compact_threshold = parse_or(
            &lookup,
            &mut warnings,
            "RESERVD_COMPACT_THRESHOLD",
            defaults.compact_threshold,
        );
        let compact_interval_secs = parse_or(
            &lookup,
            &mut warnings,
            "RESERVD_COMPACT_INTERVAL_SECS",
            defaults.compact_interval.as_secs(),
        );

        let metrics_port = match lookup("RESERVD_METRICS_PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(p) => Some(p),
                Err(e) => {
                    warnings.push(format!("RESERVD_METRICS_PORT={raw:?}: {e}, metrics disabled"));
                    None
                }
            },
            None => None,
        };
        let log_format = parse_or(
            &lookup,
            &mut warnings,
            "RESERVD_LOG_FORMAT",
            defaults.log_format,
        );

        Self {
            port,
            bind: lookup("RESERVD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("RESERVD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections,
            compact_threshold,
            compact_interval: Duration::from_secs(compact_interval_secs.max(1)),
            metrics_port,
            log_format,
            warnings,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    warnings: &mut Vec<String>,
    key: &str,
    default: T,
) -> T
where
    T: FromStr + std::fmt::Debug,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.parse() {
        Ok(v) => v,
        Err(e) => {
            warnings.push(format!("{key}={raw:?}: {e}, using {default:?}"));
            default
        }
    }
}
