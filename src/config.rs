//! carbonapi-rs configuration
//!
//! # Example configuration
//! ```yaml
//! ---
//! server:
//!   address: '0.0.0.0'
//!   port: 8080
//! upstreams:
//!   servers:
//!     - 'http://127.0.0.1:8080'
//!   max_tries: 3
//!   timeout: 10
//! response_cache:
//!   type: mem
//!   default_timeout_sec: 60
//! backend_cache:
//!   type: mem
//!   default_timeout_sec: 60
//! max_query_length: 16384
//! ```

use glob::glob;
use std::{
    collections::HashSet,
    net::{IpAddr, SocketAddr},
    path::Path,
};

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Top-level configuration structure, loaded from a primary YAML file, glob-merged
/// `conf.d/*.yaml` parts, then `CARBONAPI_`-prefixed environment variable overrides
/// (subelements separated by `__`).
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConf,
    pub upstreams: UpstreamsConf,
    #[serde(default)]
    pub response_cache: CacheConf,
    #[serde(default)]
    pub backend_cache: CacheConf,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default)]
    pub combine_multiple_targets_in_one: bool,
    #[serde(default)]
    pub require_success_all: bool,
    #[serde(default = "default_not_found_status_code")]
    pub not_found_status_code: u16,
    #[serde(default)]
    pub http_response_stack_trace: bool,
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,
    #[serde(default)]
    pub truncate_time_sec: Option<i64>,
    #[serde(default)]
    pub limiter: LimiterConf,
    #[serde(default)]
    pub graphite: Option<GraphiteTelemetryConf>,
}

impl Config {
    /// Load from a YAML file path, merging sibling `conf.d/*.yaml` parts and
    /// `CARBONAPI_`-prefixed environment overrides.
    pub fn new(config_file: &str) -> Result<Self, ConfigError> {
        let path = Path::new(config_file)
            .canonicalize()
            .expect("Can not resolve path to config file");
        let mut s = config::Config::builder().add_source(File::with_name(path.to_str().unwrap()));

        let configs_glob = format!(
            "{}/conf.d/*.yaml",
            path.parent()
                .expect("Need parent directory to config file")
                .to_str()
                .unwrap()
        );
        tracing::trace!("Analyzing {:?} as conf.d parts", configs_glob);
        for entry in glob(configs_glob.as_str()).unwrap().flatten() {
            tracing::debug!("Add {:?} config part file", entry);
            s = s.add_source(File::with_name(entry.to_str().unwrap()));
        }

        s = s.add_source(
            Environment::with_prefix("CARBONAPI")
                .prefix_separator("_")
                .separator("__"),
        );

        s.build()?.try_deserialize()
    }

    /// Build a configuration directly from a YAML string; used by tests.
    #[allow(dead_code)]
    pub fn from_config_str(data: &str) -> Self {
        let s = config::Config::builder()
            .add_source(File::from_str(data, config::FileFormat::Yaml))
            .build()
            .unwrap();
        s.try_deserialize().unwrap()
    }

    pub fn get_socket_addr(&self) -> SocketAddr {
        SocketAddr::from((
            self.server.address.as_str().parse::<IpAddr>().unwrap(),
            self.server.port,
        ))
    }

    /// Render endpoint formats this instance can serve. PNG/SVG are recognized but
    /// not implemented, so they are intentionally absent here and rejected with 501.
    pub fn supported_formats(&self) -> HashSet<&'static str> {
        ["json", "raw", "csv", "pickle", "protobuf", "carbonapi_v2_pb", "carbonapi_v3_pb"]
            .into_iter()
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConf {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConf {
    fn default() -> Self {
        ServerConf {
            address: default_address(),
            port: default_port(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum LbMethod {
    RoundRobin,
    Broadcast,
}

impl Default for LbMethod {
    fn default() -> Self {
        LbMethod::RoundRobin
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamsConf {
    pub servers: Vec<String>,
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default)]
    pub lb_method: LbMethod,
    #[serde(default = "default_upstream_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retry_codes")]
    pub retry_codes: Vec<u16>,
    #[serde(default = "default_buckets")]
    pub buckets: usize,
    #[serde(default)]
    pub scale_to_common_step: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    Mem,
    Memcache,
    Null,
}

impl Default for CacheType {
    fn default() -> Self {
        CacheType::Null
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConf {
    #[serde(default)]
    pub cache_type: CacheType,
    #[serde(default = "default_cache_timeout")]
    pub default_timeout_sec: u64,
    #[serde(default = "default_short_timeout")]
    pub short_timeout_sec: u64,
    #[serde(default = "default_short_duration")]
    pub short_duration_sec: i64,
    #[serde(default = "default_short_until_offset")]
    pub short_until_offset_sec: i64,
    #[serde(default)]
    pub memcache_servers: Vec<String>,
    #[serde(default = "default_cache_size")]
    pub size_limit_bytes: usize,
}

impl Default for CacheConf {
    fn default() -> Self {
        CacheConf {
            cache_type: CacheType::default(),
            default_timeout_sec: default_cache_timeout(),
            short_timeout_sec: default_short_timeout(),
            short_duration_sec: default_short_duration(),
            short_until_offset_sec: default_short_until_offset(),
            memcache_servers: Vec::new(),
            size_limit_bytes: default_cache_size(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LimiterConf {
    #[serde(default = "default_limiter_size")]
    pub size: usize,
}

impl Default for LimiterConf {
    fn default() -> Self {
        LimiterConf {
            size: default_limiter_size(),
        }
    }
}

/// Interface-only: the config shape for emitting internal counters over the
/// Graphite line protocol. No socket is opened by this crate; see `metrics`.
#[derive(Clone, Debug, Deserialize)]
pub struct GraphiteTelemetryConf {
    pub host: String,
    #[serde(default = "default_graphite_interval")]
    pub interval_sec: u64,
    #[serde(default = "default_graphite_prefix")]
    pub prefix: String,
    #[serde(default = "default_graphite_pattern")]
    pub pattern: String,
    #[serde(default = "default_graphite_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub extended_stat: bool,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_tries() -> u32 {
    3
}
fn default_upstream_timeout() -> u64 {
    10
}
fn default_retry_codes() -> Vec<u16> {
    vec![502, 503, 504]
}
fn default_buckets() -> usize {
    10
}
fn default_cache_timeout() -> u64 {
    60
}
fn default_short_timeout() -> u64 {
    5
}
fn default_short_duration() -> i64 {
    3600
}
fn default_short_until_offset() -> i64 {
    120
}
fn default_cache_size() -> usize {
    64 * 1024 * 1024
}
fn default_limiter_size() -> usize {
    100
}
fn default_max_query_length() -> usize {
    16384
}
fn default_not_found_status_code() -> u16 {
    200
}
fn default_time_zone() -> String {
    "UTC".to_string()
}
fn default_graphite_interval() -> u64 {
    60
}
fn default_graphite_prefix() -> String {
    "carbon.agents".to_string()
}
fn default_graphite_pattern() -> String {
    "{prefix}.{fqdn}".to_string()
}
fn default_graphite_batch_size() -> usize {
    100
}
