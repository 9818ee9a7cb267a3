//! Configuration-time checks for patterns, contexts and sequence configurations.
//!
//! Nothing here evaluates a pattern or touches storage; the service only inspects the
//! value objects, so it can gate an admin path before a pattern is ever used.

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::context::GenerationContext;
use crate::error::GeneratorError;
use crate::pattern_template::{is_valid_variable_name, PatternTemplate, Segment};
use crate::sequence_config::SequenceConfig;
use crate::settings::{GeneratorSettings, DEFAULT_COMPLEXITY_WARNING, DEFAULT_MAX_PATTERN_LENGTH};
use crate::validation_result::ValidationResult;
use crate::variables::{BuiltinVariable, RESERVED_NAMES};

pub const MAX_CONTEXT_STRING_LENGTH: usize = 100;

/// Capture used for tokens whose rendering is not known ahead of time.
const OPEN_CAPTURE: &str = "([^-]+)";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Overrides the configured maximum pattern length.
    pub max_length: Option<usize>,
    pub forbidden_variables: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationService {
    max_pattern_length: usize,
    complexity_warning: u32,
    custom_variables: BTreeSet<String>,
}

impl Default for ValidationService {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationService {
    pub fn new() -> Self {
        ValidationService {
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
            complexity_warning: DEFAULT_COMPLEXITY_WARNING,
            custom_variables: BTreeSet::new(),
        }
    }

    pub fn from_settings(settings: &GeneratorSettings) -> Self {
        ValidationService {
            max_pattern_length: settings.max_pattern_length,
            complexity_warning: settings.complexity_warning,
            custom_variables: BTreeSet::new(),
        }
    }

    /// Names resolved by a variable registry; they are never required from the context.
    pub fn with_custom_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.custom_variables
            .extend(names.into_iter().map(|n| n.as_ref().trim().to_uppercase()));
        self
    }

    pub fn validate_pattern(&self, pattern: &str) -> ValidationResult {
        self.check_pattern(pattern, self.max_pattern_length)
    }

    fn check_pattern(&self, pattern: &str, max_length: usize) -> ValidationResult {
        let mut result = ValidationResult::new();

        let template = match PatternTemplate::new(pattern) {
            Ok(template) => template,
            Err(_) => {
                result.error("pattern must not be empty");
                return result;
            }
        };

        let length = pattern.chars().count();
        if length > max_length {
            result.error(format!(
                "pattern is {} characters long, maximum is {}",
                length, max_length
            ));
        }

        for issue in template.syntax_issues() {
            result.error(issue.to_string());
        }

        let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
        for token in template.variables() {
            *occurrences.entry(token.name.as_str()).or_default() += 1;

            if !is_valid_variable_name(&token.name) {
                result.error(format!(
                    "invalid variable name `{}`: must match ^[A-Z][A-Z0-9_]*$",
                    token.name
                ));
                continue;
            }
            if let Some(builtin) = BuiltinVariable::from_name(&token.name) {
                if let Err(message) = builtin.parse_param(token.param.as_deref()) {
                    result.error(message);
                }
            }
        }

        for (name, count) in occurrences {
            if count > 1 {
                result.error(format!("variable `{}` is used {} times", name, count));
            }
        }

        let complexity = template.complexity();
        if complexity > self.complexity_warning {
            result.warning(format!(
                "pattern complexity {} exceeds {}",
                complexity, self.complexity_warning
            ));
        }

        if !template.has_counter() {
            result.warning("pattern has no {COUNTER}; generated values may collide");
        }

        result
    }

    fn is_required(&self, name: &str) -> bool {
        BuiltinVariable::from_name(name).is_none()
            && !RESERVED_NAMES.contains(&name)
            && !self.custom_variables.contains(name)
    }

    pub fn validate_context(&self, pattern: &str, context: &GenerationContext) -> ValidationResult {
        let mut result = ValidationResult::new();

        let template = match PatternTemplate::new(pattern) {
            Ok(template) => template,
            Err(e) => {
                result.error(e.to_string());
                return result;
            }
        };
        let used = template.variable_names();

        for name in used.iter().filter(|name| self.is_required(name)) {
            if !context.contains(name) {
                result.error(format!("missing required context variable `{}`", name));
            }
        }

        for (key, value) in context.all() {
            match value {
                Value::Null | Value::Bool(_) | Value::Number(_) => {}
                Value::String(s) => {
                    if s.chars().count() > MAX_CONTEXT_STRING_LENGTH {
                        result.error(format!(
                            "context value `{}` is longer than {} characters",
                            key, MAX_CONTEXT_STRING_LENGTH
                        ));
                    }
                    if s.contains('{') || s.contains('}') {
                        result.error(format!("context value `{}` must not contain braces", key));
                    }
                }
                Value::Array(_) | Value::Object(_) => {
                    result.error(format!("context value `{}` must be a scalar or null", key));
                }
            }

            if !used.contains(&key.as_str()) {
                result.warning(format!("context variable `{}` is not used by the pattern", key));
            }
        }

        result
    }

    pub fn validate_sequence_configuration(
        &self,
        config: &SequenceConfig,
        context: Option<&GenerationContext>,
        options: &ValidationOptions,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = config.check() {
            result.error(e.to_string());
        }

        let max_length = options.max_length.unwrap_or(self.max_pattern_length);
        result.merge(self.check_pattern(&config.pattern, max_length));

        if let Ok(template) = PatternTemplate::new(config.pattern.as_str()) {
            let forbidden: BTreeSet<String> = options
                .forbidden_variables
                .iter()
                .map(|name| name.trim().to_uppercase())
                .collect();
            for name in template.variable_names() {
                if forbidden.contains(name) {
                    result.error(format!("variable `{}` is not allowed", name));
                }
            }
        }

        if let Some(context) = context {
            result.merge(self.validate_context(&config.pattern, context));
        }

        debug!(
            sequence = %config.key(),
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "validated sequence configuration"
        );
        result
    }

    /// Builds an anchored matcher for values previously generated from `pattern`.
    pub fn generate_regex_pattern(&self, pattern: &str) -> Result<Regex, GeneratorError> {
        let template = PatternTemplate::new(pattern)?;
        if !template.syntax_issues().is_empty() {
            return Err(GeneratorError::invalid_pattern(
                pattern,
                template.syntax_issues().iter().map(ToString::to_string).collect(),
            ));
        }

        let mut expression = String::from("^");
        for segment in template.segments() {
            match segment {
                Segment::Literal(text) => expression.push_str(&regex::escape(text)),
                Segment::Token(token) => match BuiltinVariable::from_name(&token.name) {
                    Some(builtin) => {
                        let format = builtin
                            .parse_param(token.param.as_deref())
                            .map_err(|message| {
                                GeneratorError::invalid_pattern(pattern, vec![message])
                            })?;
                        expression.push_str(&builtin.regex_fragment(format));
                    }
                    None => expression.push_str(OPEN_CAPTURE),
                },
            }
        }
        expression.push('$');

        Regex::new(&expression)
            .map_err(|e| GeneratorError::invalid_pattern(pattern, vec![e.to_string()]))
    }
}
