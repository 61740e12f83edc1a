//! Service configuration, loaded with Figment.
//!
//! Sources, highest precedence first:
//! 1. Environment variables prefixed `LUDDITE_`, nested keys separated by
//!    `__` (e.g. `LUDDITE_VERSION__MAX=3`)
//! 2. The TOML file passed to [`ServiceConfig::load`]
//! 3. Defaults
//!
//! ```toml
//! addr = "0.0.0.0:8080"
//!
//! [version]
//! min = 1
//! max = 3
//!
//! [transport]
//! tls = true
//! cert_file_path = "/etc/widgets/cert.pem"
//! key_file_path = "/etc/widgets/key.pem"
//!
//! [metrics]
//! enabled = true
//! prefix = "widgets_"
//! ```

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration. Immutable once the service is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_addr")]
    pub addr: String,

    #[serde(default)]
    pub version: VersionConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Supported API version range and where requests declare their version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionConfig {
    #[serde(default = "default_version")]
    pub min: u32,

    #[serde(default = "default_version")]
    pub max: u32,

    /// Request header carrying the version; also echoed on responses.
    #[serde(default = "default_version_header")]
    pub header: String,

    /// Read the version from a leading `/v{n}` path segment instead of the
    /// header.
    #[serde(default)]
    pub path_prefix: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub cert_file_path: PathBuf,

    #[serde(default)]
    pub key_file_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Address the Prometheus exporter listens on.
    #[serde(default = "default_metrics_server")]
    pub server: String,

    /// Prepended to every metric name.
    #[serde(default)]
    pub prefix: String,

    /// Exporter upkeep interval in milliseconds.
    #[serde(default = "default_metrics_interval")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `luddite=debug,info`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Schema-file serving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URI, e.g. `/schema` serves `/schema/v1`, `/schema/v2`, …
    #[serde(default = "default_schema_uri_path")]
    pub uri_path: String,

    /// Directory holding the schema files.
    #[serde(default = "default_schema_file_path")]
    pub file_path: PathBuf,

    /// File name pattern; `%d` is replaced by the version number.
    #[serde(default = "default_schema_file_pattern")]
    pub file_pattern: String,

    /// Redirect `/` to `uri_path`.
    #[serde(default)]
    pub root_redirect: bool,
}

// Default value functions
fn default_addr() -> String { "0.0.0.0:8080".to_string() }
fn default_version() -> u32 { 1 }
fn default_version_header() -> String { "X-Api-Version".to_string() }
fn default_metrics_server() -> String { "127.0.0.1:9000".to_string() }
fn default_metrics_interval() -> u64 { 2_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_schema_uri_path() -> String { "/schema".to_string() }
fn default_schema_file_path() -> PathBuf { PathBuf::from("schema") }
fn default_schema_file_pattern() -> String { "v%d.json".to_string() }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            version: VersionConfig::default(),
            transport: TransportConfig::default(),
            metrics: MetricsConfig::default(),
            log: LogConfig::default(),
            schema: SchemaConfig::default(),
        }
    }
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            min: default_version(),
            max: default_version(),
            header: default_version_header(),
            path_prefix: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: default_metrics_server(),
            prefix: String::new(),
            interval_ms: default_metrics_interval(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: LogFormat::default() }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uri_path: default_schema_uri_path(),
            file_path: default_schema_file_path(),
            file_pattern: default_schema_file_pattern(),
            root_redirect: false,
        }
    }
}

impl ServiceConfig {
    /// Loads defaults, then `path`, then `LUDDITE_*` environment variables.
    /// A missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(ServiceConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LUDDITE_").split("__"));
        Self::from_figment(figment)
    }

    /// Extracts and validates a configuration from any Figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the service relies on.
    pub fn validate(&self) -> Result<()> {
        check_version_range(self.version.min, self.version.max)
    }
}

/// Both bounds must be at least 1 and `max` must not be below `min`.
pub(crate) fn check_version_range(min: u32, max: u32) -> Result<()> {
    let reason = if min < 1 {
        "minimum API version must be greater than zero"
    } else if max < 1 {
        "maximum API version must be greater than zero"
    } else if max < min {
        "maximum API version must not be below the minimum"
    } else {
        return Ok(());
    };
    Err(Error::InvalidVersionRange { min, max, reason })
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::default();
        assert_eq!(config.addr, "0.0.0.0:8080");
        assert_eq!((config.version.min, config.version.max), (1, 1));
        assert_eq!(config.version.header, "X-Api-Version");
        assert!(!config.transport.tls);
        assert!(!config.metrics.enabled);
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_version_ranges() {
        for (min, max) in [(0, 1), (1, 0), (3, 2)] {
            let mut config = ServiceConfig::default();
            config.version.min = min;
            config.version.max = max;
            assert!(
                matches!(config.validate(), Err(Error::InvalidVersionRange { .. })),
                "[{min}, {max}] should be rejected",
            );
        }
    }

    #[test]
    fn loads_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file("luddite.toml", r#"
                addr = "127.0.0.1:3000"

                [version]
                min = 1
                max = 2

                [log]
                format = "json"

                [schema]
                enabled = true
                file_pattern = "api-v%d.json"
            "#)?;
            jail.set_env("LUDDITE_VERSION__MAX", "4");
            jail.set_env("LUDDITE_METRICS__PREFIX", "widgets_");

            let config = ServiceConfig::load("luddite.toml").expect("config loads");
            assert_eq!(config.addr, "127.0.0.1:3000");
            assert_eq!((config.version.min, config.version.max), (1, 4));
            assert_eq!(config.metrics.prefix, "widgets_");
            assert_eq!(config.log.format, LogFormat::Json);
            assert!(config.schema.enabled);
            assert_eq!(config.schema.file_pattern, "api-v%d.json");
            assert_eq!(config.schema.uri_path, "/schema");
            Ok(())
        });
    }

    #[test]
    fn load_rejects_invalid_range_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("LUDDITE_VERSION__MIN", "0");
            let err = ServiceConfig::load("missing.toml").unwrap_err();
            assert!(matches!(err, Error::InvalidVersionRange { min: 0, .. }));
            Ok(())
        });
    }
}
