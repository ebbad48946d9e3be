//! Server settings
//!
//! Layered with the `config` crate, later sources overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. a YAML file (`--config`, else `APP_CONFIG_FILE`, else `config.yaml` if present)
//! 3. environment variables, matched case-insensitively by key (`PORT`,
//!    `REDIS_URL`, `DEFAULT_NAMESPACE`, ...)
//!
//! Command-line overrides are applied last by `main`.

use anyhow::Context;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use rexis_memory::MemoryConfig;
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Key-value backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Redis at `redis_url`
    Redis,
    /// Process memory; lost on restart
    Memory,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

/// Server settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Redis connection URL
    pub redis_url: String,

    /// Storage backend
    pub storage: StorageBackend,

    /// Enable long-term memory
    pub long_term_memory: bool,

    /// Namespace used when a call carries none
    pub default_namespace: Option<String>,

    /// User used when a call carries none
    pub default_user_id: Option<String>,

    /// Default working memory TTL
    pub working_memory_ttl_seconds: u64,

    /// Semantic dedup distance; unset disables semantic dedup
    pub semantic_dedup_threshold: Option<f32>,

    /// HTTP port
    pub port: u16,

    /// HTTP bind address
    pub host: String,

    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,

    /// Log format
    pub log_format: LogFormat,

    /// Skip bearer token checks on HTTP
    pub disable_auth: bool,

    /// Expected token issuer
    pub oauth2_issuer_url: Option<String>,

    /// Expected token audience
    pub oauth2_audience: Option<String>,

    /// JWKS document URL
    pub oauth2_jwks_url: Option<String>,
}

impl Settings {
    /// Load defaults, the YAML file and the environment
    ///
    /// An explicitly named file must exist; the default `config.yaml` is optional.
    pub fn load(config_file: Option<&str>) -> anyhow::Result<Self> {
        let (path, required) = match config_file {
            Some(path) => (path.to_string(), true),
            None => (DEFAULT_CONFIG_FILE.to_string(), false),
        };

        let settings: Settings = Self::defaults()?
            .add_source(File::new(&path, FileFormat::Yaml).required(required))
            .add_source(Environment::default().try_parsing(true))
            .build()
            .with_context(|| format!("failed to read configuration (file: {})", path))?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> anyhow::Result<ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("redis_url", "redis://localhost:6379")?
            .set_default("storage", "redis")?
            .set_default("long_term_memory", true)?
            .set_default("working_memory_ttl_seconds", 3600)?
            .set_default("port", 8000)?
            .set_default("host", "0.0.0.0")?
            .set_default("log_level", "info")?
            .set_default("log_format", "text")?
            .set_default("disable_auth", false)?)
    }

    /// Check settings that depend on each other
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.working_memory_ttl_seconds == 0 {
            anyhow::bail!("working_memory_ttl_seconds must be positive");
        }
        if !self.disable_auth && self.oauth2_jwks_url.is_none() && self.oauth2_issuer_url.is_none() {
            anyhow::bail!(
                "authentication is enabled but neither oauth2_jwks_url nor oauth2_issuer_url is set \
                 (set disable_auth=true for local development)"
            );
        }
        Ok(())
    }

    /// JWKS URL, derived from the issuer when not set explicitly
    pub fn jwks_url(&self) -> Option<String> {
        self.oauth2_jwks_url.clone().or_else(|| {
            self.oauth2_issuer_url
                .as_deref()
                .map(|issuer| format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/')))
        })
    }

    /// Library configuration derived from these settings
    pub fn memory_config(&self) -> MemoryConfig {
        let mut config = MemoryConfig::new()
            .with_long_term_memory(self.long_term_memory)
            .with_default_ttl_seconds(self.working_memory_ttl_seconds);
        if let Some(namespace) = &self.default_namespace {
            config = config.with_default_namespace(namespace.clone());
        }
        if let Some(user_id) = &self.default_user_id {
            config = config.with_default_user_id(user_id.clone());
        }
        if let Some(threshold) = self.semantic_dedup_threshold {
            config = config.with_semantic_dedup_threshold(threshold);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> Settings {
        Settings::defaults()
            .unwrap()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = from_yaml("disable_auth: true");

        assert_eq!(settings.redis_url, "redis://localhost:6379");
        assert_eq!(settings.storage, StorageBackend::Redis);
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.log_format, LogFormat::Text);
        assert!(settings.long_term_memory);
        assert!(settings.default_namespace.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_yaml_overrides_and_memory_config() {
        let settings = from_yaml(
            r#"
storage: memory
long_term_memory: false
default_namespace: acme
default_user_id: u1
working_memory_ttl_seconds: 60
semantic_dedup_threshold: 0.15
log_format: json
disable_auth: true
"#,
        );

        assert_eq!(settings.storage, StorageBackend::Memory);
        assert_eq!(settings.log_format, LogFormat::Json);

        let config = settings.memory_config();
        assert!(!config.long_term_memory);
        assert_eq!(config.default_namespace.as_deref(), Some("acme"));
        assert_eq!(config.default_user_id.as_deref(), Some("u1"));
        assert_eq!(config.default_ttl_seconds, 60);
        assert_eq!(config.semantic_dedup_threshold, Some(0.15));
    }

    #[test]
    fn test_auth_requires_a_key_source() {
        let settings = from_yaml("disable_auth: false");
        assert!(settings.validate().is_err());

        let settings = from_yaml("oauth2_issuer_url: https://auth.example.com/");
        assert!(settings.validate().is_ok());
        assert_eq!(
            settings.jwks_url().as_deref(),
            Some("https://auth.example.com/.well-known/jwks.json")
        );
    }
}
