//! Conditional segments rewritten before variable substitution.
//!
//! The reference syntax is `[IF:COND]then[ELSE]otherwise[/IF]`, where `[ELSE]` is
//! optional and COND is `NAME`, `NAME=VALUE` or `NAME!=VALUE`. Blocks do not nest.
//! Square brackets keep the markers out of the `{}` token grammar, so the braces inside
//! a block are checked by the ordinary syntax pass.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::context::GenerationContext;
use crate::error::GeneratorError;
use crate::pattern_template::is_valid_variable_name;
use crate::validation_result::ValidationResult;
use crate::variables::{BuiltinVariable, VariableFormat};

const OPEN: &str = "[IF:";
const ELSE: &str = "[ELSE]";
const CLOSE: &str = "[/IF]";

pub trait ConditionalProcessor: Send + Sync {
    fn has_conditionals(&self, pattern: &str) -> bool;

    fn process_conditionals(
        &self,
        pattern: &str,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<String, GeneratorError>;

    fn validate_conditional_syntax(&self, pattern: &str) -> ValidationResult;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition<'a> {
    Present(&'a str),
    Equals(&'a str, &'a str),
    NotEquals(&'a str, &'a str),
}

impl<'a> Condition<'a> {
    fn parse(raw: &'a str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty condition in [IF:]".to_string());
        }
        let condition = if let Some((name, value)) = raw.split_once("!=") {
            Condition::NotEquals(name.trim(), value.trim())
        } else if let Some((name, value)) = raw.split_once('=') {
            Condition::Equals(name.trim(), value.trim())
        } else {
            Condition::Present(raw)
        };

        let name = condition.name();
        if !is_valid_variable_name(name) {
            return Err(format!(
                "invalid condition variable `{}`: must match ^[A-Z][A-Z0-9_]*$",
                name
            ));
        }
        Ok(condition)
    }

    fn name(&self) -> &'a str {
        match self {
            Condition::Present(name)
            | Condition::Equals(name, _)
            | Condition::NotEquals(name, _) => *name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Block {
        condition: Condition<'a>,
        then: &'a str,
        otherwise: &'a str,
    },
}

fn check_stray_markers(text: &str, errors: &mut Vec<String>) {
    if text.contains(ELSE) {
        errors.push("[ELSE] outside of an [IF:] block".to_string());
    }
    if text.contains(CLOSE) {
        errors.push("[/IF] without a matching [IF:]".to_string());
    }
}

fn parse_blocks(pattern: &str) -> Result<Vec<Piece<'_>>, Vec<String>> {
    let mut pieces = Vec::new();
    let mut errors = Vec::new();
    let mut rest = pattern;

    while let Some(open) = rest.find(OPEN) {
        let before = &rest[..open];
        check_stray_markers(before, &mut errors);
        if !before.is_empty() {
            pieces.push(Piece::Text(before));
        }

        let after_open = &rest[open + OPEN.len()..];
        let Some(cond_end) = after_open.find(']') else {
            errors.push("unterminated [IF: condition".to_string());
            return Err(errors);
        };
        let raw_condition = &after_open[..cond_end];
        let body_and_rest = &after_open[cond_end + 1..];

        let Some(close) = body_and_rest.find(CLOSE) else {
            errors.push(format!("[IF:{}] is missing its [/IF]", raw_condition));
            return Err(errors);
        };
        let body = &body_and_rest[..close];
        if body.contains(OPEN) {
            errors.push(format!("nested [IF:] inside [IF:{}]", raw_condition));
        }

        let (then, otherwise) = body.split_once(ELSE).unwrap_or((body, ""));
        if otherwise.contains(ELSE) {
            errors.push(format!("[IF:{}] has more than one [ELSE]", raw_condition));
        }

        match Condition::parse(raw_condition) {
            Ok(condition) => pieces.push(Piece::Block {
                condition,
                then,
                otherwise,
            }),
            Err(message) => errors.push(message),
        }

        rest = &body_and_rest[close + CLOSE.len()..];
    }

    check_stray_markers(rest, &mut errors);
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }

    if errors.is_empty() {
        Ok(pieces)
    } else {
        Err(errors)
    }
}

/// Reference [`ConditionalProcessor`]. Condition names are looked up in the context
/// first and then among the date built-ins at `now` in the configured zone.
#[derive(Debug, Clone)]
pub struct BlockConditionalProcessor {
    tz: Tz,
}

impl Default for BlockConditionalProcessor {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl BlockConditionalProcessor {
    pub fn new(tz: Tz) -> Self {
        BlockConditionalProcessor { tz }
    }

    fn lookup(
        &self,
        name: &str,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if let Some(value) = context.render(name) {
            return Some(value);
        }
        match BuiltinVariable::from_name(name) {
            Some(BuiltinVariable::Counter) | None => None,
            Some(builtin) => {
                let local = now.with_timezone(&self.tz);
                Some(builtin.render(VariableFormat::Default, &local, 0))
            }
        }
    }

    fn holds(
        &self,
        condition: &Condition<'_>,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> bool {
        let value = self.lookup(condition.name(), context, now);
        match condition {
            Condition::Present(_) => value.map(|v| is_truthy(&v)).unwrap_or(false),
            Condition::Equals(_, expected) => value.as_deref() == Some(*expected),
            Condition::NotEquals(_, expected) => value.as_deref() != Some(*expected),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

impl ConditionalProcessor for BlockConditionalProcessor {
    fn has_conditionals(&self, pattern: &str) -> bool {
        pattern.contains(OPEN)
    }

    fn process_conditionals(
        &self,
        pattern: &str,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<String, GeneratorError> {
        let pieces = parse_blocks(pattern)
            .map_err(|errors| GeneratorError::invalid_pattern(pattern, errors))?;

        let mut output = String::with_capacity(pattern.len());
        for piece in &pieces {
            match piece {
                Piece::Text(text) => output.push_str(text),
                Piece::Block {
                    condition,
                    then,
                    otherwise,
                } => {
                    if self.holds(condition, context, now) {
                        output.push_str(then);
                    } else {
                        output.push_str(otherwise);
                    }
                }
            }
        }
        Ok(output)
    }

    fn validate_conditional_syntax(&self, pattern: &str) -> ValidationResult {
        let mut result = ValidationResult::new();
        if let Err(errors) = parse_blocks(pattern) {
            result.errors = errors;
        }
        result
    }
}
