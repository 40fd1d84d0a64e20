// Build script to generate JSON schema for configuration

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use std::fs;
use std::path::Path;

// Re-define the config structs with JsonSchema derive, mirroring src/config.rs.

/// Top-level configuration structure
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct Config {
    pub server: ServerConf,
    pub upstreams: UpstreamsConf,
    pub response_cache: CacheConf,
    pub backend_cache: CacheConf,
    pub max_query_length: usize,
    pub combine_multiple_targets_in_one: bool,
    pub require_success_all: bool,
    pub not_found_status_code: u16,
    pub http_response_stack_trace: bool,
    pub default_time_zone: String,
    pub truncate_time_sec: Option<i64>,
    pub limiter: LimiterConf,
    pub graphite: Option<GraphiteTelemetryConf>,
}

/// HTTP server binding configuration
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct ServerConf {
    /// IP address to bind to (default: 0.0.0.0)
    pub address: String,
    /// Port to bind to (default: 8080)
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum LbMethod {
    RoundRobin,
    Broadcast,
}

/// Upstream backend cluster configuration
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct UpstreamsConf {
    /// Backend base URLs
    pub servers: Vec<String>,
    /// Max attempts per fetch (default: 3)
    pub max_tries: u32,
    pub lb_method: LbMethod,
    /// Per-attempt HTTP timeout in seconds (default: 10)
    pub timeout: u64,
    /// Status codes that trigger a retry on the next server
    pub retry_codes: Vec<u16>,
    pub buckets: usize,
    pub scale_to_common_step: bool,
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    Mem,
    Memcache,
    Null,
}

/// Response/backend cache configuration
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct CacheConf {
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    pub default_timeout_sec: u64,
    pub short_timeout_sec: u64,
    pub short_duration_sec: i64,
    pub short_until_offset_sec: i64,
    pub memcache_servers: Vec<String>,
    pub size_limit_bytes: usize,
}

/// Evaluation concurrency limiter
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct LimiterConf {
    pub size: usize,
}

/// Interface-only: shape for emitting internal counters over Graphite line protocol.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct GraphiteTelemetryConf {
    pub host: String,
    pub interval_sec: u64,
    pub prefix: String,
    pub pattern: String,
    pub batch_size: usize,
    pub extended_stat: bool,
}

fn main() {
    println!("cargo:rerun-if-changed=src/config.rs");

    let schema = schema_for!(Config);
    let schema_json = serde_json::to_string_pretty(&schema).expect("failed to serialize schema");

    let schemas_dir = Path::new("doc/schemas");
    if !schemas_dir.exists() {
        fs::create_dir_all(schemas_dir).expect("failed to create doc/schemas directory");
    }

    let schema_path = schemas_dir.join("config-schema.json");
    fs::write(&schema_path, schema_json).expect("failed to write config-schema.json");

    println!("cargo:warning=generated JSON schema at {:?}", schema_path);
}
