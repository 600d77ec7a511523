//! Plugin configuration.
//!
//! Loaded from a TOML file given on the command line. The one key every
//! deployment must provide is the transport locator,
//! `CVMFS_CACHE_EXTERNAL_LOCATOR`; the environment variable of the same
//! name takes precedence over the file.

use serde::Deserialize;
use std::path::Path;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML.
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration is structurally valid but unusable.
    #[error("{0}")]
    Invalid(String),
}

/// Plugin configuration loaded from a TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Transport endpoint the plugin listens on, e.g.
    /// `unix:/var/run/cache-plugin.socket` or `tcp:127.0.0.1:4224`.
    #[serde(default, alias = "CVMFS_CACHE_EXTERNAL_LOCATOR")]
    pub locator: Option<String>,

    /// Cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cache sizing configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Total payload bytes the cache may hold (e.g. "4GB", "512MB").
    #[serde(default = "default_cache_size", deserialize_with = "deserialize_size")]
    pub size: usize,

    /// Maximum number of simultaneously open handles.
    #[serde(default = "default_handle_limit")]
    pub handle_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            handle_limit: default_handle_limit(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// Single-line output.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter (overridden by `RUST_LOG` when set).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include the event's module path in the output.
    #[serde(default)]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: false,
        }
    }
}

fn default_cache_size() -> usize {
    4 * 1024 * 1024 * 1024 // 4GB
}

fn default_handle_limit() -> usize {
    ram_cache::DEFAULT_HANDLE_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Deserialize a size given as a number or a string like "64MB".
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct SizeVisitor;

    impl<'de> serde::de::Visitor<'de> for SizeVisitor {
        type Value = usize;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a byte count or a size string like \"512MB\"")
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<usize, E> {
            usize::try_from(v).map_err(|_| E::custom("size out of range"))
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<usize, E> {
            usize::try_from(v).map_err(|_| E::custom("size out of range"))
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<usize, E> {
            parse_size(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(SizeVisitor)
}

/// Bytes per recognized size unit. Units are matched case-insensitively.
const SIZE_UNITS: &[(&str, usize)] = &[
    ("", 1),
    ("b", 1),
    ("k", 1 << 10),
    ("kb", 1 << 10),
    ("kib", 1 << 10),
    ("m", 1 << 20),
    ("mb", 1 << 20),
    ("mib", 1 << 20),
    ("g", 1 << 30),
    ("gb", 1 << 30),
    ("gib", 1 << 30),
    ("t", 1 << 40),
    ("tb", 1 << 40),
    ("tib", 1 << 40),
];

/// Parse a human-readable byte size such as "1024", "512MB", or "4 GiB".
pub fn parse_size(input: &str) -> Result<usize, String> {
    let trimmed = input.trim();
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(format!("size '{}' does not start with a number", input));
    }
    let value: usize = trimmed[..digits]
        .parse()
        .map_err(|_| format!("size '{}' is out of range", input))?;

    let unit = trimmed[digits..].trim().to_ascii_lowercase();
    let scale = SIZE_UNITS
        .iter()
        .find(|(suffix, _)| *suffix == unit)
        .map(|(_, scale)| *scale)
        .ok_or_else(|| format!("size '{}' has an unknown unit", input))?;

    value
        .checked_mul(scale)
        .ok_or_else(|| format!("size '{}' overflows", input))
}

impl Config {
    /// Load and validate the configuration from a TOML file.
    ///
    /// The `CVMFS_CACHE_EXTERNAL_LOCATOR` environment variable, when set,
    /// replaces the locator from the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        if let Ok(locator) = std::env::var("CVMFS_CACHE_EXTERNAL_LOCATOR") {
            config.locator = Some(locator);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locator.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid(
                "CVMFS_CACHE_EXTERNAL_LOCATOR missing".to_string(),
            ));
        }
        if self.cache.handle_limit == 0 {
            return Err(ConfigError::Invalid(
                "cache.handle_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The validated locator string.
    pub fn locator(&self) -> &str {
        self.locator.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("64MB").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("4GB").unwrap(), 4 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("2GiB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("16 kb").unwrap(), 16 * 1024);
        assert_eq!(parse_size(" 8mib ").unwrap(), 8 * 1024 * 1024);
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("12XB").is_err());
        assert!(parse_size("99999999999999999999").is_err());
    }

    #[test]
    fn test_minimal_config() {
        let config: Config = toml::from_str(r#"locator = "tcp:127.0.0.1:4224""#).unwrap();
        config.validate().unwrap();
        assert_eq!(config.locator(), "tcp:127.0.0.1:4224");
        assert_eq!(config.cache.size, 4 * 1024 * 1024 * 1024);
        assert_eq!(config.cache.handle_limit, 8192);
    }

    #[test]
    fn test_locator_key_alias() {
        let config: Config =
            toml::from_str(r#"CVMFS_CACHE_EXTERNAL_LOCATOR = "unix:/tmp/cache.socket""#).unwrap();
        config.validate().unwrap();
        assert_eq!(config.locator(), "unix:/tmp/cache.socket");
    }

    #[test]
    fn test_missing_locator_is_rejected() {
        let config: Config = toml::from_str("[cache]\nsize = 1000").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            locator = "unix:/tmp/cache.socket"

            [cache]
            size = "512MB"
            handle_limit = 1024

            [logging]
            level = "debug"
            format = "json"
            target = true
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.cache.size, 512 * 1024 * 1024);
        assert_eq!(config.cache.handle_limit, 1024);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.target);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>(r#"locatr = "tcp:1.2.3.4:1""#).is_err());
    }
}
