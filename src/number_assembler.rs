use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::conditional::ConditionalProcessor;
use crate::context::GenerationContext;
use crate::counter_state::CounterState;
use crate::error::GeneratorError;
use crate::pattern_template::{
    is_valid_variable_name, scan, PatternTemplate, Segment, VariableToken,
};
use crate::settings::GeneratorSettings;
use crate::validation_result::ValidationResult;
use crate::variable_registry::VariableRegistry;
use crate::variables::{BuiltinVariable, MAX_PAD_WIDTH};

/// Turns a template plus counter state plus context into a formatted number.
///
/// `evaluate` must be pure: the same inputs always give the same string.
pub trait PatternEvaluator: Send + Sync {
    fn supported_variables(&self) -> Vec<String>;

    fn supports_variable(&self, name: &str) -> bool;

    fn evaluate(
        &self,
        template: &PatternTemplate,
        state: &CounterState,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError>;

    /// Evaluates once against a synthetic state stamped with the current time.
    fn preview(
        &self,
        template: &PatternTemplate,
        context: &GenerationContext,
        preview_counter: u64,
    ) -> Result<String, GeneratorError> {
        self.evaluate(template, &CounterState::new(preview_counter, Utc::now()), context)
    }

    fn validate_syntax(&self, template: &PatternTemplate) -> ValidationResult;
}

/// Token-based [`PatternEvaluator`].
///
/// Resolution order per token: built-in, registered custom variable, context value.
/// Anything left over is written back verbatim unless strict mode is on.
#[derive(Clone)]
pub struct NumberAssembler {
    tz: Tz,
    strict: bool,
    registry: Option<Arc<dyn VariableRegistry>>,
    conditionals: Option<Arc<dyn ConditionalProcessor>>,
}

impl Default for NumberAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl NumberAssembler {
    pub fn new() -> Self {
        NumberAssembler {
            tz: Tz::UTC,
            strict: false,
            registry: None,
            conditionals: None,
        }
    }

    pub fn from_settings(settings: &GeneratorSettings) -> Self {
        NumberAssembler::new()
            .with_timezone(settings.timezone)
            .with_strict(settings.strict_variables)
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn VariableRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_conditionals(mut self, processor: Arc<dyn ConditionalProcessor>) -> Self {
        self.conditionals = Some(processor);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// One-shot helper: parse `pattern` and evaluate it for `counter` at `timestamp`.
    pub fn assemble_number(
        &self,
        pattern: &str,
        counter: u64,
        timestamp: DateTime<Utc>,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        let template = PatternTemplate::new(pattern)?;
        self.evaluate(&template, &CounterState::new(counter, timestamp), context)
    }

    fn resolve(
        &self,
        token: &VariableToken,
        state: &CounterState,
        context: &GenerationContext,
    ) -> Option<String> {
        if let Some(builtin) = BuiltinVariable::from_name(&token.name) {
            let format = builtin.parse_param(token.param.as_deref()).ok()?;
            let local = state.timestamp.with_timezone(&self.tz);
            return Some(builtin.render(format, &local, state.counter));
        }

        if let Some(variable) = self.registry.as_ref().and_then(|r| r.get(&token.name)) {
            if let Err(reason) = variable.validate(context) {
                debug!(variable = %token, %reason, "custom variable rejected context");
                return None;
            }
            return match token.param.as_deref() {
                Some(param) if variable.supports_parameters() => {
                    variable.resolve_with_parameter(context, state.timestamp, param)
                }
                _ => variable.resolve(context, state.timestamp),
            };
        }

        let value = context.render(&token.name)?;
        match token.param.as_deref().map(str::parse::<usize>) {
            Some(Ok(width)) if width <= MAX_PAD_WIDTH => {
                Some(format!("{:0>width$}", value, width = width))
            }
            _ => Some(value),
        }
    }
}

impl PatternEvaluator for NumberAssembler {
    fn supported_variables(&self) -> Vec<String> {
        let mut names: Vec<String> = BuiltinVariable::ALL
            .iter()
            .map(|builtin| builtin.name().to_string())
            .collect();
        if let Some(registry) = &self.registry {
            names.extend(registry.get_names());
        }
        names
    }

    fn supports_variable(&self, name: &str) -> bool {
        BuiltinVariable::from_name(name).is_some()
            || self.registry.as_ref().map(|r| r.has(name)).unwrap_or(false)
    }

    fn evaluate(
        &self,
        template: &PatternTemplate,
        state: &CounterState,
        context: &GenerationContext,
    ) -> Result<String, GeneratorError> {
        let rewritten;
        let segments = match &self.conditionals {
            Some(processor) if processor.has_conditionals(template.as_str()) => {
                let pattern =
                    processor.process_conditionals(template.as_str(), context, state.timestamp)?;
                rewritten = scan(&pattern);
                &rewritten.segments[..]
            }
            _ => template.segments(),
        };

        let mut output = String::with_capacity(template.as_str().len() + 16);
        let mut unresolved: Vec<String> = Vec::new();

        for segment in segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Token(token) => match self.resolve(token, state, context) {
                    Some(value) => output.push_str(&value),
                    None => {
                        debug!(variable = %token, "leaving unresolved variable verbatim");
                        if !unresolved.contains(&token.name) {
                            unresolved.push(token.name.clone());
                        }
                        output.push_str(&token.raw());
                    }
                },
            }
        }

        if self.strict && !unresolved.is_empty() {
            return Err(GeneratorError::MissingContext {
                variables: unresolved,
            });
        }
        Ok(output)
    }

    fn validate_syntax(&self, template: &PatternTemplate) -> ValidationResult {
        let mut result = ValidationResult::new();

        for issue in template.syntax_issues() {
            result.error(issue.to_string());
        }

        let mut warned: HashSet<&str> = HashSet::new();
        for token in template.variables() {
            if !is_valid_variable_name(&token.name) {
                result.error(format!(
                    "invalid variable name `{}`: must match ^[A-Z][A-Z0-9_]*$",
                    token.name
                ));
                continue;
            }
            match BuiltinVariable::from_name(&token.name) {
                Some(builtin) => {
                    if let Err(message) = builtin.parse_param(token.param.as_deref()) {
                        result.error(message);
                    }
                }
                None if self.supports_variable(&token.name) => {}
                None => {
                    if warned.insert(token.name.as_str()) {
                        result.warning(format!(
                            "variable `{}` is neither built-in nor registered; \
                             it will be resolved from the context at runtime",
                            token.name
                        ));
                    }
                }
            }
        }

        if let Some(processor) = &self.conditionals {
            if processor.has_conditionals(template.as_str()) {
                result.merge(processor.validate_conditional_syntax(template.as_str()));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::BlockConditionalProcessor;
    use crate::variable_registry::{FnVariable, InMemoryVariableRegistry};
    use chrono::TimeZone;

    fn march_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn evaluate(
        assembler: &NumberAssembler,
        pattern: &str,
        counter: u64,
        context: &GenerationContext,
    ) -> String {
        assembler
            .assemble_number(pattern, counter, march_first(), context)
            .unwrap()
    }

    #[test]
    fn test_assemble_number() {
        let assembler = NumberAssembler::new();
        let ctx = GenerationContext::new();
        let number = evaluate(&assembler, "TEST-{YEAR}-{COUNTER:4}", 123, &ctx);
        assert_eq!(number, "TEST-2025-0123");
    }

    #[test]
    fn test_assemble_number_with_prefix_from_context() {
        let assembler = NumberAssembler::new();
        let context = GenerationContext::new().with("prefix", "ORDER");
        let number = evaluate(&assembler, "{PREFIX}-{COUNTER:6}", 456, &context);
        assert_eq!(number, "ORDER-000456");
    }

    #[test]
    fn test_invoice_example() {
        let assembler = NumberAssembler::new();
        let number = evaluate(&assembler, "INV-{YEAR}-{COUNTER:4}", 7, &GenerationContext::new());
        assert_eq!(number, "INV-2025-0007");
    }

    #[test]
    fn test_unresolved_tokens_pass_through_verbatim() {
        let assembler = NumberAssembler::new();
        let number = evaluate(
            &assembler,
            "{BRANCH}-{COUNTER}-{REGION:3}-{MONTH:BOGUS}",
            5,
            &GenerationContext::new(),
        );
        assert_eq!(number, "{BRANCH}-5-{REGION:3}-{MONTH:BOGUS}");
    }

    #[test]
    fn test_strict_mode_reports_missing_variables() {
        let assembler = NumberAssembler::new().with_strict(true);
        let err = assembler
            .assemble_number(
                "{BRANCH}-{COUNTER}-{BRANCH}",
                1,
                march_first(),
                &GenerationContext::new(),
            )
            .unwrap_err();
        match err {
            GeneratorError::MissingContext { variables } => assert_eq!(variables, vec!["BRANCH"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_context_values_can_be_padded() {
        let assembler = NumberAssembler::new();
        let context = GenerationContext::new()
            .with("store", 42)
            .with("blank", serde_json::Value::Null);
        assert_eq!(
            evaluate(&assembler, "S{STORE:5}{BLANK}-{COUNTER}", 1, &context),
            "S00042-1"
        );
    }

    #[test]
    fn test_custom_variables_resolve_before_context() {
        let registry = Arc::new(InMemoryVariableRegistry::with_standard_variables());
        registry
            .register(Arc::new(
                FnVariable::new("DEPT", |ctx, _| ctx.render("DEPARTMENT").map(|d| d.to_uppercase()))
                    .requires("DEPARTMENT"),
            ))
            .unwrap();
        let assembler = NumberAssembler::new().with_registry(registry);

        let context = GenerationContext::new().with("department", "ops").with("dept", "ignored");
        assert_eq!(evaluate(&assembler, "{DEPT}-{COUNTER}", 3, &context), "OPS-3");
        assert_eq!(
            evaluate(&assembler, "{TIMESTAMP:MS}", 3, &context),
            march_first().timestamp_millis().to_string()
        );

        // A custom variable whose context check fails stays verbatim.
        assert_eq!(evaluate(&assembler, "{DEPT}", 3, &GenerationContext::new()), "{DEPT}");
        assert!(assembler.supports_variable("DEPT"));
        assert!(assembler.supported_variables().contains(&"TIMESTAMP".to_string()));
    }

    #[test]
    fn test_builtins_render_in_configured_timezone() {
        let assembler = NumberAssembler::new().with_timezone(chrono_tz::Asia::Tokyo);
        let late = Utc.with_ymd_and_hms(2024, 12, 31, 20, 0, 0).unwrap();
        let number = assembler
            .assemble_number("{YEAR}{MONTH}{DAY}-{HOUR}", 1, late, &GenerationContext::new())
            .unwrap();
        assert_eq!(number, "20250101-05");
    }

    #[test]
    fn test_conditionals_rewrite_before_substitution() {
        let assembler = NumberAssembler::new()
            .with_conditionals(Arc::new(BlockConditionalProcessor::default()));
        let context = GenerationContext::new().with("rush", true).with("branch", "NYC");
        let number = evaluate(&assembler, "[IF:RUSH]R{BRANCH}-[/IF]{COUNTER:3}", 9, &context);
        assert_eq!(number, "RNYC-009");
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let assembler = NumberAssembler::new();
        let template = PatternTemplate::new("{YEAR}{WEEK:W}-{COUNTER:5}-{CODE}").unwrap();
        let state = CounterState::new(77, march_first());
        let context = GenerationContext::new().with("code", "X");
        let first = assembler.evaluate(&template, &state, &context).unwrap();
        let second = assembler.evaluate(&template, &state, &context).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_validate_syntax_errors() {
        let assembler = NumberAssembler::new();
        for pattern in ["{COUNTER", "{}", "{YEAR}{MONTH", "{A{B}}", "X}", "{year}"] {
            let template = PatternTemplate::new(pattern).unwrap();
            assert!(
                !assembler.validate_syntax(&template).is_valid(),
                "expected `{}` to be invalid",
                pattern
            );
        }
    }

    #[test]
    fn test_validate_syntax_unknown_variable_is_warning() {
        let assembler = NumberAssembler::new();
        let template = PatternTemplate::new("{CUSTOM_FIELD}-{COUNTER}-{CUSTOM_FIELD}").unwrap();
        let result = assembler.validate_syntax(&template);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.has_warning_containing("CUSTOM_FIELD"));
    }

    #[test]
    fn test_validate_syntax_includes_conditionals() {
        let assembler = NumberAssembler::new()
            .with_conditionals(Arc::new(BlockConditionalProcessor::default()));
        let template = PatternTemplate::new("[IF:RUSH]R-{COUNTER}").unwrap();
        assert!(!assembler.validate_syntax(&template).is_valid());
    }

    #[test]
    fn test_preview_uses_requested_counter() {
        let assembler = NumberAssembler::new();
        let template = PatternTemplate::new("P-{COUNTER:3}").unwrap();
        assert_eq!(assembler.preview(&template, &GenerationContext::new(), 1).unwrap(), "P-001");
        assert_eq!(assembler.preview(&template, &GenerationContext::new(), 42).unwrap(), "P-042");
    }
}
