//! Configuration loading

use crate::types::Config;
use crate::ConfigFormat;
use regex::Regex;
use sluice_core::{Error, Result};
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a file, format chosen by extension
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let format = ConfigFormat::from_path(path)?;
    tracing::debug!(path = %path.display(), format = ?format, "Loading configuration");

    load_from_str(&content, format)
}

/// Expand `${VAR}` and `${VAR:-default}` references
pub fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match (env::var(var_name), default_value) {
            (Ok(val), _) => val,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(Error::Config(format!(
                    "environment variable '{var_name}' not set and no default provided"
                )));
            }
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);
    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded = expand_env_vars(content)?;

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded)
            .map_err(|e| Error::Config(format!("failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded)
            .map_err(|e| Error::Config(format!("failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

/// Load and validate configuration
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let config = load_from_file(path)?;
    crate::validator::validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogFormat;
    use std::io::Write;
    use std::time::Duration;

    const YAML_CONFIG: &str = r#"
server:
  port: 8080
  idle-timeout: 2m
gateway:
  global-timeout: 5s
  global-filters:
    - name: AddRequestHeader
      args: { name: X-Gateway, value: sluice }
  httpclient:
    connect-timeout: 3s
  routes:
    - id: users
      uri: http://users:8081
      predicates:
        - name: Path
          args: { patterns: "/users/**" }
        - name: Method
          args: { methods: [GET, POST] }
      filters:
        - name: RewritePath
          args: { regexp: "^/users/(.*)$", replacement: "/$1" }
      timeout: 250ms
      circuit-breaker:
        max-requests: 2
        consecutive-failures: 3
      log-level: debug
logging:
  level: debug
  format: json
"#;

    #[test]
    fn test_load_yaml() {
        let config = load_from_str(YAML_CONFIG, ConfigFormat::Yaml).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.server.read_timeout, Duration::from_secs(10));
        assert_eq!(config.gateway.global_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.gateway.global_filters.len(), 1);
        assert_eq!(config.gateway.httpclient.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.logging.format, LogFormat::Json);

        let route = &config.gateway.routes[0];
        assert_eq!(route.predicates.len(), 2);
        assert_eq!(route.timeout, Some(Duration::from_millis(250)));
        assert_eq!(route.circuit_breaker.as_ref().unwrap().max_requests, 2);
        assert_eq!(route.log_level.as_deref(), Some("debug"));
        assert_eq!(
            route.filters[0].args.get_str("replacement").unwrap(),
            "/$1"
        );
    }

    #[test]
    fn test_load_toml() {
        let config = load_from_str(
            r#"
[server]
port = 9000

[[gateway.routes]]
id = "orders"
uri = "https://orders.internal"
timeout = "1s"

[[gateway.routes.predicates]]
name = "Host"
args = { patterns = ["*.example.com"] }
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        let route = &config.gateway.routes[0];
        assert_eq!(route.predicates[0].name, "Host");
        assert_eq!(route.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_load_json() {
        let config = load_from_str(
            r#"{"gateway": {"routes": [{"id": "a", "uri": "http://a", "predicates": ["Path"]}]}}"#,
            ConfigFormat::Json,
        )
        .unwrap();
        assert_eq!(config.gateway.routes[0].predicates[0].name, "Path");
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(load_from_str("invalid: [yaml", ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("SLUICE_TEST_BACKEND", "http://backend.from.env:9000");

        let expanded =
            expand_env_vars("uri: ${SLUICE_TEST_BACKEND}\nport: ${SLUICE_TEST_UNSET_PORT:-8123}").unwrap();
        assert_eq!(expanded, "uri: http://backend.from.env:9000\nport: 8123");

        env::remove_var("SLUICE_TEST_BACKEND");
    }

    #[test]
    fn test_env_var_missing_without_default() {
        let err = expand_env_vars("uri: ${SLUICE_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(err.to_string().contains("SLUICE_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML_CONFIG.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.gateway.routes[0].id, "users");
    }

    #[test]
    fn test_load_config_validates() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"gateway": {"routes": []}}"#).unwrap();

        assert!(load_config(file.path()).is_err());
    }
}
