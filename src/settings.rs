//! Generator settings.
//!
//! Loaded from `NUMGEN_*` environment variables with fallback to defaults.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

pub const DEFAULT_MAX_PATTERN_LENGTH: usize = 500;
pub const DEFAULT_COMPLEXITY_WARNING: u32 = 100;
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "numgen";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: `{value}`")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Zone used for calendar variables and reset boundaries.
    pub timezone: Tz,

    /// Unresolved tokens fail generation instead of passing through verbatim.
    pub strict_variables: bool,

    pub max_pattern_length: usize,

    /// Complexity score above which a pattern draws a warning.
    pub complexity_warning: u32,

    pub redis_url: Option<String>,

    pub redis_key_prefix: String,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        GeneratorSettings {
            timezone: Tz::UTC,
            strict_variables: false,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
            complexity_warning: DEFAULT_COMPLEXITY_WARNING,
            redis_url: None,
            redis_key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_string(),
        }
    }
}

impl GeneratorSettings {
    /// Load settings from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|name| env::var(name).ok())
    }

    /// Load settings through an arbitrary lookup, e.g. a map in tests.
    pub fn load_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GeneratorSettings::default();

        let settings = GeneratorSettings {
            timezone: parse_or("NUMGEN_TIMEZONE", &lookup, defaults.timezone)?,
            strict_variables: parse_or(
                "NUMGEN_STRICT_VARIABLES",
                &lookup,
                defaults.strict_variables,
            )?,
            max_pattern_length: parse_or(
                "NUMGEN_MAX_PATTERN_LENGTH",
                &lookup,
                defaults.max_pattern_length,
            )?,
            complexity_warning: parse_or(
                "NUMGEN_COMPLEXITY_WARNING",
                &lookup,
                defaults.complexity_warning,
            )?,
            redis_url: lookup("NUMGEN_REDIS_URL").filter(|url| !url.trim().is_empty()),
            redis_key_prefix: lookup("NUMGEN_REDIS_KEY_PREFIX")
                .filter(|prefix| !prefix.trim().is_empty())
                .unwrap_or(defaults.redis_key_prefix),
        };

        if settings.max_pattern_length == 0 {
            return Err(ConfigError::InvalidValue {
                name: "NUMGEN_MAX_PATTERN_LENGTH".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(settings)
    }
}

fn parse_or<T, F>(name: &str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}
