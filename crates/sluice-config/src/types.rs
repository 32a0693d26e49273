//! Configuration types

use serde::{Deserialize, Deserializer, Serialize};
use sluice_core::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Routes, filters and backend client
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_address")]
    pub address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Time allowed to receive the request head
    #[serde(default = "default_read_header_timeout", with = "crate::duration")]
    pub read_header_timeout: Duration,

    /// Time allowed to receive the request body
    #[serde(default = "default_read_timeout", with = "crate::duration")]
    pub read_timeout: Duration,

    /// Longest a single write may stall
    #[serde(default = "default_write_timeout", with = "crate::duration")]
    pub write_timeout: Duration,

    /// Longest a connection may sit without reading
    #[serde(default = "default_idle_timeout", with = "crate::duration")]
    pub idle_timeout: Duration,

    /// Request head size cap
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,

    /// Drain period for in-flight connections on shutdown
    #[serde(default = "default_shutdown_timeout", with = "crate::duration")]
    pub shutdown_timeout: Duration,
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_read_header_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_header_bytes() -> usize {
    1 << 20
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            read_header_timeout: default_read_header_timeout(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            idle_timeout: default_idle_timeout(),
            max_header_bytes: default_max_header_bytes(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    /// Routes, in match order
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Filters run before every route's own filters
    #[serde(default)]
    pub global_filters: Vec<SpecConfig>,

    /// Deadline for routes without their own timeout
    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub global_timeout: Option<Duration>,

    /// Backend client
    #[serde(default)]
    pub httpclient: HttpClientConfig,
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RouteConfig {
    /// Unique route ID
    pub id: String,

    /// Backend base URI
    pub uri: String,

    /// Predicates, all of which must match
    #[serde(default)]
    pub predicates: Vec<SpecConfig>,

    /// Route filters
    #[serde(default)]
    pub filters: Vec<SpecConfig>,

    /// Per-request deadline
    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// Breaker guarding the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerSettings>,

    /// Route log level (`off`, `error` .. `trace`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl RouteConfig {
    /// Route with no predicates or filters
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            predicates: Vec::new(),
            filters: Vec::new(),
            timeout: None,
            circuit_breaker: None,
            log_level: None,
        }
    }

    /// Add a predicate
    pub fn predicate(mut self, name: impl Into<String>, args: Args) -> Self {
        self.predicates.push(SpecConfig::new(name, args));
        self
    }

    /// Add a filter
    pub fn filter(mut self, name: impl Into<String>, args: Args) -> Self {
        self.filters.push(SpecConfig::new(name, args));
        self
    }

    /// Set the deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a circuit breaker
    pub fn circuit_breaker(mut self, settings: CircuitBreakerSettings) -> Self {
        self.circuit_breaker = Some(settings);
        self
    }
}

/// Named builder with arguments
///
/// Written either as `{ name: ..., args: {...} }` or as a bare name.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpecConfig {
    /// Builder name
    pub name: String,

    /// Builder arguments
    #[serde(default, skip_serializing_if = "Args::is_empty")]
    pub args: Args,
}

impl SpecConfig {
    /// Spec with arguments
    pub fn new(name: impl Into<String>, args: Args) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        args: Args,
    },
}

impl<'de> Deserialize<'de> for SpecConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawSpec::deserialize(deserializer)? {
            RawSpec::Name(name) => SpecConfig::new(name, Args::new()),
            RawSpec::Full { name, args } => SpecConfig::new(name, args),
        })
    }
}

/// Route circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerSettings {
    /// Half-open probe budget
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Closed-state counting window (0 disables rollover)
    #[serde(default, with = "crate::duration")]
    pub interval: Duration,

    /// Time spent open before probing
    #[serde(default = "default_breaker_timeout", with = "crate::duration")]
    pub timeout: Duration,

    /// Trip once consecutive failures exceed this
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: u64,
}

fn default_max_requests() -> u32 {
    1
}

fn default_breaker_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_consecutive_failures() -> u64 {
    5
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            interval: Duration::ZERO,
            timeout: default_breaker_timeout(),
            consecutive_failures: default_consecutive_failures(),
        }
    }
}

/// Backend client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct HttpClientConfig {
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "crate::duration")]
    pub connect_timeout: Duration,

    /// Idle pooled connection lifetime
    #[serde(default = "default_pool_idle_timeout", with = "crate::duration")]
    pub pool_idle_timeout: Duration,

    /// Idle connections kept per backend host
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Skip backend certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Custom CA and client identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ClientTlsConfig>,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            pool_idle_timeout: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            insecure_skip_verify: false,
            tls: None,
        }
    }
}

/// Backend TLS files (PEM)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ClientTlsConfig {
    /// Extra CA bundle
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Client certificate chain
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Client private key
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8000);
        assert_eq!(server.read_header_timeout, Duration::from_secs(2));
        assert_eq!(server.idle_timeout, Duration::from_secs(60));
        assert_eq!(server.max_header_bytes, 1024 * 1024);
    }

    #[test]
    fn test_spec_forms() {
        let specs: Vec<SpecConfig> = serde_yaml::from_str(
            r#"
- RequestResponseLogger
- name: Method
  args:
    methods: [GET, POST]
"#,
        )
        .unwrap();

        assert_eq!(specs[0].name, "RequestResponseLogger");
        assert!(specs[0].args.is_empty());
        assert_eq!(specs[1].args.get_string_list("methods").unwrap(), vec!["GET", "POST"]);
    }

    #[test]
    fn test_route_defaults() {
        let route: RouteConfig = serde_yaml::from_str(
            r#"
id: users
uri: http://users:8080
circuit-breaker:
  timeout: 100ms
"#,
        )
        .unwrap();

        assert!(route.predicates.is_empty());
        assert_eq!(route.timeout, None);
        let breaker = route.circuit_breaker.unwrap();
        assert_eq!(breaker.timeout, Duration::from_millis(100));
        assert_eq!(breaker.max_requests, 1);
        assert_eq!(breaker.consecutive_failures, 5);
    }

    #[test]
    fn test_log_format() {
        let logging: LoggingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(logging.format, LogFormat::Json);
        assert_eq!(logging.level, "info");
    }
}
