use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::context::GenerationContext;
use crate::pattern_template::is_valid_variable_name;
use crate::variables::is_builtin;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid variable name `{0}`: must match ^[A-Z][A-Z0-9_]*$")]
    InvalidName(String),

    #[error("`{0}` is a built-in variable and cannot be overridden")]
    Builtin(String),

    #[error("variable registry lock poisoned")]
    Poisoned,
}

/// A variable resolved by application code rather than by the evaluator itself.
pub trait CustomVariable: Send + Sync {
    fn name(&self) -> &str;

    /// Checks the context carries what [`CustomVariable::resolve`] needs.
    fn validate(&self, context: &GenerationContext) -> Result<(), String>;

    fn resolve(&self, context: &GenerationContext, timestamp: DateTime<Utc>) -> Option<String>;

    fn supports_parameters(&self) -> bool {
        false
    }

    fn resolve_with_parameter(
        &self,
        context: &GenerationContext,
        timestamp: DateTime<Utc>,
        _param: &str,
    ) -> Option<String> {
        self.resolve(context, timestamp)
    }
}

pub trait VariableRegistry: Send + Sync {
    fn get_names(&self) -> Vec<String>;
    fn has(&self, name: &str) -> bool;
    fn get(&self, name: &str) -> Option<Arc<dyn CustomVariable>>;
    fn all(&self) -> Vec<Arc<dyn CustomVariable>>;
}

#[derive(Default)]
pub struct InMemoryVariableRegistry {
    variables: RwLock<BTreeMap<String, Arc<dyn CustomVariable>>>,
}

impl InMemoryVariableRegistry {
    pub fn new() -> Self {
        InMemoryVariableRegistry {
            variables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry preloaded with the variables every deployment gets.
    pub fn with_standard_variables() -> Self {
        let mut variables: BTreeMap<String, Arc<dyn CustomVariable>> = BTreeMap::new();
        let timestamp = TimestampVariable;
        variables.insert(timestamp.name().to_string(), Arc::new(timestamp));
        InMemoryVariableRegistry {
            variables: RwLock::new(variables),
        }
    }

    /// Adds or replaces a variable under its name.
    pub fn register(&self, variable: Arc<dyn CustomVariable>) -> Result<(), RegistryError> {
        let name = variable.name();
        if !is_valid_variable_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if is_builtin(name) {
            return Err(RegistryError::Builtin(name.to_string()));
        }
        let mut variables = self.variables.write().map_err(|_| RegistryError::Poisoned)?;
        variables.insert(name.to_string(), variable);
        Ok(())
    }
}

impl VariableRegistry for InMemoryVariableRegistry {
    fn get_names(&self) -> Vec<String> {
        match self.variables.read() {
            Ok(variables) => variables.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn has(&self, name: &str) -> bool {
        self.variables
            .read()
            .map(|variables| variables.contains_key(name))
            .unwrap_or(false)
    }

    fn get(&self, name: &str) -> Option<Arc<dyn CustomVariable>> {
        self.variables.read().ok()?.get(name).cloned()
    }

    fn all(&self) -> Vec<Arc<dyn CustomVariable>> {
        match self.variables.read() {
            Ok(variables) => variables.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for InMemoryVariableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryVariableRegistry")
            .field("names", &self.get_names())
            .finish()
    }
}

/// `{TIMESTAMP}` as Unix seconds, `{TIMESTAMP:MS}` as milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampVariable;

impl CustomVariable for TimestampVariable {
    fn name(&self) -> &str {
        "TIMESTAMP"
    }

    fn validate(&self, _context: &GenerationContext) -> Result<(), String> {
        Ok(())
    }

    fn resolve(&self, _context: &GenerationContext, timestamp: DateTime<Utc>) -> Option<String> {
        Some(timestamp.timestamp().to_string())
    }

    fn supports_parameters(&self) -> bool {
        true
    }

    fn resolve_with_parameter(
        &self,
        context: &GenerationContext,
        timestamp: DateTime<Utc>,
        param: &str,
    ) -> Option<String> {
        match param {
            "S" => self.resolve(context, timestamp),
            "MS" => Some(timestamp.timestamp_millis().to_string()),
            _ => None,
        }
    }
}

type Resolver = dyn Fn(&GenerationContext, DateTime<Utc>) -> Option<String> + Send + Sync;

/// Custom variable backed by a closure, with an optional list of context keys it needs.
pub struct FnVariable {
    name: String,
    required: Vec<String>,
    resolver: Box<Resolver>,
}

impl FnVariable {
    pub fn new<F>(name: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&GenerationContext, DateTime<Utc>) -> Option<String> + Send + Sync + 'static,
    {
        FnVariable {
            name: name.into(),
            required: Vec::new(),
            resolver: Box::new(resolver),
        }
    }

    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.required.push(key.into());
        self
    }
}

impl CustomVariable for FnVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, context: &GenerationContext) -> Result<(), String> {
        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !context.contains(key))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("{} requires context keys: {}", self.name, missing.join(", ")))
        }
    }

    fn resolve(&self, context: &GenerationContext, timestamp: DateTime<Utc>) -> Option<String> {
        (self.resolver)(context, timestamp)
    }
}

impl fmt::Debug for FnVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnVariable")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_register_and_get_variable() {
        let registry = InMemoryVariableRegistry::with_standard_variables();
        registry
            .register(Arc::new(FnVariable::new("FISCAL", |_, _| Some("FY25".into()))))
            .unwrap();

        assert!(registry.has("FISCAL"));
        assert!(registry.has("TIMESTAMP"));
        assert!(!registry.has("BRANCH"));
        assert_eq!(registry.get_names(), vec!["FISCAL", "TIMESTAMP"]);
        assert_eq!(registry.all().len(), 2);
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let registry = InMemoryVariableRegistry::new();

        let lower = registry.register(Arc::new(FnVariable::new("fiscal", |_, _| None)));
        assert_eq!(lower, Err(RegistryError::InvalidName("fiscal".into())));

        let builtin = registry.register(Arc::new(FnVariable::new("YEAR", |_, _| None)));
        assert_eq!(builtin, Err(RegistryError::Builtin("YEAR".into())));

        assert!(registry.get_names().is_empty());
    }

    #[test]
    fn test_timestamp_parameters() {
        let when = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let context = GenerationContext::new();
        let variable = TimestampVariable;

        assert_eq!(variable.resolve(&context, when).as_deref(), Some("1740787200"));
        assert_eq!(
            variable.resolve_with_parameter(&context, when, "MS").as_deref(),
            Some("1740787200000")
        );
        assert_eq!(variable.resolve_with_parameter(&context, when, "NS"), None);
    }

    #[test]
    fn test_fn_variable_validates_required_keys() {
        let variable = FnVariable::new("DEPT_CODE", |ctx, _| {
            ctx.render("DEPT")
                .map(|dept| dept.chars().take(3).collect::<String>().to_uppercase())
        })
        .requires("DEPT");

        let when = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let context = GenerationContext::new().with("dept", "operations");
        assert!(variable.validate(&context).is_ok());
        assert_eq!(variable.resolve(&context, when).as_deref(), Some("OPE"));

        let err = variable.validate(&GenerationContext::new()).unwrap_err();
        assert_eq!(err, "DEPT_CODE requires context keys: DEPT");
    }
}
