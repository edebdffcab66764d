//! Layered configuration (§6): defaults → config file → environment
//! variables, merged in that priority order. Modeled on the teacher's
//! `ConfigurationLayer`/`SourceMetadata` shape (a stack of named sources,
//! highest priority wins per key) but collapsed to the concrete option set
//! this service actually reads, since there is no plugin-style source
//! registry here.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::IngestError;

/// One named configuration source, kept around for diagnostics (e.g. "why
/// is `BATCH_SIZE` 500?" → "env overrode file overrode default").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourcePriority {
    Default = 0,
    File = 1,
    Env = 2,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    queue_url: Option<String>,
    log_stream: Option<String>,
    metric_stream: Option<String>,
    log_group: Option<String>,
    metric_group: Option<String>,
    stream_maxlen: Option<u64>,
    batch_size: Option<usize>,
    batch_max_age_ms: Option<u64>,
    read_block_ms: Option<u64>,
    reclaim_idle_ms: Option<u64>,
    reclaim_interval_ms: Option<u64>,
    sink_log_url: Option<String>,
    sink_metric_url: Option<String>,
    sink_timeout_ms: Option<u64>,
    sink_retry_max: Option<u32>,
    sink_retry_backoff_ms: Option<u64>,
    rate_tier_community: Option<String>,
    rate_tier_professional: Option<String>,
    rate_tier_enterprise: Option<String>,
    syslog_port_range: Option<String>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
    tls_ca: Option<String>,
    shutdown_deadline_ms: Option<u64>,
    http3_bind: Option<String>,
    http1_bind: Option<String>,
}

/// Fully resolved runtime configuration. Every field here corresponds to one
/// row of the §6 option table.
#[derive(Debug, Clone)]
pub struct Config {
    pub queue_url: String,
    pub log_stream: String,
    pub metric_stream: String,
    pub log_group: String,
    pub metric_group: String,
    pub stream_maxlen: u64,

    pub batch_size: usize,
    pub batch_max_age: Duration,
    pub read_block: Duration,
    pub reclaim_idle: Duration,
    pub reclaim_interval: Duration,

    pub sink_log_url: String,
    pub sink_metric_url: String,
    pub sink_timeout: Duration,
    pub sink_retry_max: u32,
    pub sink_retry_backoff: Duration,

    pub rate_tiers: RateTiers,
    pub syslog_port_range: (u16, u16),

    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub tls_ca: Option<String>,

    pub shutdown_deadline: Duration,

    pub http3_bind: String,
    pub http1_bind: String,
}

#[derive(Debug, Clone)]
pub struct RateTiers {
    pub community: RateLimit,
    pub professional: RateLimit,
    pub enterprise: RateLimit,
}

#[derive(Debug, Clone, Copy)]
pub enum RateLimit {
    PerMinute(u32),
    Unlimited,
}

impl RateLimit {
    fn parse(raw: &str) -> Result<Self, IngestError> {
        if raw.eq_ignore_ascii_case("unlimited") {
            return Ok(RateLimit::Unlimited);
        }
        let count = raw
            .strip_suffix("/min")
            .ok_or_else(|| IngestError::invalid_input(format!("rate tier {raw:?} must end in /min or be 'unlimited'")))?
            .parse::<u32>()
            .map_err(|e| IngestError::invalid_input(format!("rate tier {raw:?}: {e}")))?;
        Ok(RateLimit::PerMinute(count))
    }
}

impl Config {
    /// Loads defaults, overlays a TOML file (if present at `path`), then
    /// overlays process environment variables — highest priority wins,
    /// matching the precedence named in §6.
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        let file_cfg = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    IngestError::internal(format!("reading config file {p:?}: {e}"))
                })?;
                toml::from_str::<FileConfig>(&text)
                    .map_err(|e| IngestError::invalid_input(format!("parsing config file: {e}")))?
            }
            _ => FileConfig::default(),
        };

        let overlay = EnvOverlay::from_process();
        Self::assemble(file_cfg, overlay)
    }

    fn assemble(file_cfg: FileConfig, env: EnvOverlay) -> Result<Self, IngestError> {
        macro_rules! pick {
            ($field:ident, $default:expr) => {
                env.get(stringify!($field))
                    .cloned()
                    .or(file_cfg.$field.clone())
                    .unwrap_or_else(|| $default.to_string())
            };
        }
        macro_rules! pick_parsed {
            ($field:ident, $default:expr) => {{
                let raw: Option<String> =
                    env.get(stringify!($field)).cloned().or_else(|| file_cfg.$field.map(|v| v.to_string()));
                match raw {
                    Some(v) => v.parse().map_err(|e| {
                        IngestError::invalid_input(format!(
                            "{}: invalid value {v:?}: {e}",
                            stringify!($field)
                        ))
                    })?,
                    None => $default,
                }
            }};
        }

        let syslog_port_range_raw = env
            .get("syslog_port_range")
            .cloned()
            .or(file_cfg.syslog_port_range.clone())
            .unwrap_or_else(|| "10000-11000".to_string());
        let syslog_port_range = parse_port_range(&syslog_port_range_raw)?;

        Ok(Config {
            queue_url: pick!(queue_url, "redis://127.0.0.1:6379"),
            log_stream: pick!(log_stream, "logs:raw"),
            metric_stream: pick!(metric_stream, "metrics:raw"),
            log_group: pick!(log_group, "log-workers"),
            metric_group: pick!(metric_group, "metric-workers"),
            stream_maxlen: pick_parsed!(stream_maxlen, 1_000_000u64),

            batch_size: pick_parsed!(batch_size, 500usize),
            batch_max_age: Duration::from_millis(pick_parsed!(batch_max_age_ms, 2_000u64)),
            read_block: Duration::from_millis(pick_parsed!(read_block_ms, 5_000u64)),
            reclaim_idle: Duration::from_millis(pick_parsed!(reclaim_idle_ms, 60_000u64)),
            reclaim_interval: Duration::from_millis(pick_parsed!(reclaim_interval_ms, 15_000u64)),

            sink_log_url: pick!(sink_log_url, "http://127.0.0.1:9200/_bulk"),
            sink_metric_url: pick!(sink_metric_url, "http://127.0.0.1:9091"),
            sink_timeout: Duration::from_millis(pick_parsed!(sink_timeout_ms, 5_000u64)),
            sink_retry_max: pick_parsed!(sink_retry_max, 5u32),
            sink_retry_backoff: Duration::from_millis(pick_parsed!(sink_retry_backoff_ms, 200u64)),

            rate_tiers: RateTiers {
                community: RateLimit::parse(&pick!(rate_tier_community, "100/min"))?,
                professional: RateLimit::parse(&pick!(rate_tier_professional, "1000/min"))?,
                enterprise: RateLimit::parse(&pick!(rate_tier_enterprise, "unlimited"))?,
            },
            syslog_port_range,

            tls_cert: env.get("tls_cert").cloned().or(file_cfg.tls_cert),
            tls_key: env.get("tls_key").cloned().or(file_cfg.tls_key),
            tls_ca: env.get("tls_ca").cloned().or(file_cfg.tls_ca),

            shutdown_deadline: Duration::from_millis(pick_parsed!(shutdown_deadline_ms, 30_000u64)),

            http3_bind: pick!(http3_bind, "0.0.0.0:8443"),
            http1_bind: pick!(http1_bind, "0.0.0.0:8080"),
        })
    }
}

fn parse_port_range(raw: &str) -> Result<(u16, u16), IngestError> {
    let (low, high) = raw
        .split_once('-')
        .ok_or_else(|| IngestError::invalid_input(format!("SYSLOG_PORT_RANGE {raw:?} must be LOW-HIGH")))?;
    let low: u16 = low
        .trim()
        .parse()
        .map_err(|e| IngestError::invalid_input(format!("SYSLOG_PORT_RANGE low bound: {e}")))?;
    let high: u16 = high
        .trim()
        .parse()
        .map_err(|e| IngestError::invalid_input(format!("SYSLOG_PORT_RANGE high bound: {e}")))?;
    if low > high {
        return Err(IngestError::invalid_input("SYSLOG_PORT_RANGE low bound exceeds high bound"));
    }
    Ok((low, high))
}

/// Environment variables, upper-cased keys mapped to the same field names
/// used by `FileConfig`, read once at startup.
struct EnvOverlay {
    values: BTreeMap<String, String>,
}

impl EnvOverlay {
    fn from_process() -> Self {
        let mut values = BTreeMap::new();
        for (key, value) in env::vars() {
            values.insert(key.to_lowercase(), value);
        }
        Self { values }
    }

    fn get(&self, field: &str) -> Option<&String> {
        self.values.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_with_no_file_or_env() {
        let cfg = Config::assemble(FileConfig::default(), EnvOverlay { values: BTreeMap::new() }).unwrap();
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.syslog_port_range, (10000, 11000));
        assert!(matches!(cfg.rate_tiers.enterprise, RateLimit::Unlimited));
    }

    #[test]
    fn env_overrides_file() {
        let file_cfg = FileConfig { batch_size: Some(10), ..Default::default() };
        let mut values = BTreeMap::new();
        values.insert("batch_size".to_string(), "20".to_string());
        let cfg = Config::assemble(file_cfg, EnvOverlay { values }).unwrap();
        assert_eq!(cfg.batch_size, 20);
    }

    #[test]
    fn file_overrides_default_when_env_absent() {
        let file_cfg = FileConfig { batch_size: Some(77), ..Default::default() };
        let cfg = Config::assemble(file_cfg, EnvOverlay { values: BTreeMap::new() }).unwrap();
        assert_eq!(cfg.batch_size, 77);
    }

    #[test]
    fn rejects_malformed_port_range() {
        assert!(parse_port_range("oops").is_err());
        assert!(parse_port_range("11000-10000").is_err());
        assert_eq!(parse_port_range("10000-11000").unwrap(), (10000, 11000));
    }
}
