use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub instance: InstanceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub records: RecordSyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub rest: Option<RestApiConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest: Some(RestApiConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rest_listen")]
    pub listen: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_rest_listen(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// How address-managed records are derived and checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSyncConfig {
    /// Maintain PTR records in reverse zones of the governing view
    #[serde(default = "default_true")]
    pub auto_ptr: bool,
    /// Reject an address record that duplicates an existing active record
    #[serde(default = "default_true")]
    pub enforce_unique_records: bool,
}

impl Default for RecordSyncConfig {
    fn default() -> Self {
        Self {
            auto_ptr: true,
            enforce_unique_records: true,
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_rest_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("/data/dnsviews.redb")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::Error::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
[instance]
id = "test-01"

[database]
path = "/tmp/test.redb"

[logging]
level = "debug"
format = "text"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.instance.id, "test-01");
        assert_eq!(config.database.path, PathBuf::from("/tmp/test.redb"));
        assert_eq!(config.logging.format, "text");
        // defaults
        let rest = config.api.rest.unwrap();
        assert!(rest.enabled);
        assert_eq!(rest.listen, "0.0.0.0:8080");
        assert!(config.records.auto_ptr);
        assert!(config.records.enforce_unique_records);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[instance]
id = "dns-views-01"

[api.rest]
enabled = true
listen = "127.0.0.1:9090"
api_key = "secret"

[database]
path = "/data/dnsviews.redb"

[logging]
level = "info"
format = "json"

[records]
auto_ptr = false
enforce_unique_records = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let rest = config.api.rest.unwrap();
        assert_eq!(rest.listen, "127.0.0.1:9090");
        assert_eq!(rest.api_key.as_deref(), Some("secret"));
        assert!(!config.records.auto_ptr);
        assert!(!config.records.enforce_unique_records);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/dnsviews.toml"));
        assert!(matches!(err, Err(crate::error::Error::Config(_))));
    }
}
