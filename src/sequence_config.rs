use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GeneratorError;
use crate::pattern_template::PatternTemplate;

/// Policy governing when a counter restarts on a calendar boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    Never,
    Daily,
    Monthly,
    Yearly,
}

impl ResetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPeriod::Never => "never",
            ResetPeriod::Daily => "daily",
            ResetPeriod::Monthly => "monthly",
            ResetPeriod::Yearly => "yearly",
        }
    }
}

impl fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetPeriod {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" | "none" => Ok(ResetPeriod::Never),
            "daily" => Ok(ResetPeriod::Daily),
            "monthly" => Ok(ResetPeriod::Monthly),
            "yearly" => Ok(ResetPeriod::Yearly),
            other => Err(GeneratorError::UnsupportedConfig(format!(
                "unknown reset period `{}`",
                other
            ))),
        }
    }
}

/// Identity of a sequence: unique per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceKey {
    pub tenant_id: String,
    pub sequence_name: String,
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.sequence_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub tenant_id: String,
    pub sequence_name: String,
    pub pattern: String,
    pub reset_period: ResetPeriod,
    #[serde(default)]
    pub reset_limit: Option<u64>,
    #[serde(default = "default_step_size")]
    pub step_size: u64,
    /// Width applied to a bare `{COUNTER}` token. Zero leaves it unpadded.
    #[serde(default)]
    pub padding: u32,
}

fn default_step_size() -> u64 {
    1
}

impl SequenceConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        sequence_name: impl Into<String>,
        pattern: impl Into<String>,
        reset_period: ResetPeriod,
    ) -> Result<Self, GeneratorError> {
        let config = SequenceConfig {
            tenant_id: tenant_id.into(),
            sequence_name: sequence_name.into(),
            pattern: pattern.into(),
            reset_period,
            reset_limit: None,
            step_size: 1,
            padding: 0,
        };
        config.check()?;
        Ok(config)
    }

    pub fn with_reset_limit(mut self, limit: u64) -> Result<Self, GeneratorError> {
        self.reset_limit = Some(limit);
        self.check()?;
        Ok(self)
    }

    pub fn with_step_size(mut self, step_size: u64) -> Result<Self, GeneratorError> {
        self.step_size = step_size;
        self.check()?;
        Ok(self)
    }

    pub fn with_padding(mut self, padding: u32) -> Result<Self, GeneratorError> {
        self.padding = padding;
        self.check()?;
        Ok(self)
    }

    pub fn key(&self) -> SequenceKey {
        SequenceKey {
            tenant_id: self.tenant_id.clone(),
            sequence_name: self.sequence_name.clone(),
        }
    }

    /// Rejects values no generation could ever honour.
    pub fn check(&self) -> Result<(), GeneratorError> {
        let mut problems = Vec::new();
        if self.tenant_id.trim().is_empty() {
            problems.push("tenant id must not be empty".to_string());
        }
        if self.sequence_name.trim().is_empty() {
            problems.push("sequence name must not be empty".to_string());
        }
        if self.step_size == 0 {
            problems.push("step size must be at least 1".to_string());
        }
        if self.reset_limit == Some(0) {
            problems.push("reset limit must be at least 1".to_string());
        }
        if self.padding > 20 {
            problems.push(format!("padding {} exceeds the maximum of 20", self.padding));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GeneratorError::UnsupportedConfig(problems.join("; ")))
        }
    }

    /// The pattern with the configured padding folded into bare `{COUNTER}` tokens.
    pub fn effective_pattern(&self) -> String {
        if self.padding == 0 {
            return self.pattern.clone();
        }
        self.pattern
            .replace("{COUNTER}", &format!("{{COUNTER:{}}}", self.padding))
    }

    pub fn template(&self) -> Result<PatternTemplate, GeneratorError> {
        PatternTemplate::new(self.effective_pattern())
    }
}
