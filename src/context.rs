use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Caller-supplied variables for a single generation.
///
/// Keys are stored upper-cased so `{BRANCH}` resolves whether the caller sent
/// `branch` or `Branch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, Value>")]
pub struct GenerationContext {
    values: BTreeMap<String, Value>,
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<Value>) {
        self.values.insert(normalize_key(key.as_ref()), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&normalize_key(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize_key(key))
    }

    pub fn all(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// String form of a scalar value. Null renders empty; arrays and objects have no
    /// textual form and resolve to `None`.
    pub fn render(&self, key: &str) -> Option<String> {
        self.get(key).and_then(render_scalar)
    }
}

pub(crate) fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_uppercase()
}

impl From<BTreeMap<String, Value>> for GenerationContext {
    fn from(values: BTreeMap<String, Value>) -> Self {
        values.into_iter().collect()
    }
}

impl From<GenerationContext> for BTreeMap<String, Value> {
    fn from(context: GenerationContext) -> Self {
        context.values
    }
}

impl From<Map<String, Value>> for GenerationContext {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for GenerationContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = GenerationContext::new();
        for (key, value) in iter {
            context.insert(key, value);
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_are_case_insensitive() {
        let context = GenerationContext::new().with("branch", "NYC").with("Region", 7);
        assert_eq!(context.render("BRANCH").as_deref(), Some("NYC"));
        assert_eq!(context.render("region").as_deref(), Some("7"));
        assert!(context.contains("Branch"));
        assert_eq!(context.keys().collect::<Vec<_>>(), vec!["BRANCH", "REGION"]);
    }

    #[test]
    fn test_render_scalars_only() {
        let context: GenerationContext = json!({
            "empty": null,
            "flag": true,
            "list": [1, 2],
        })
        .as_object()
        .cloned()
        .unwrap()
        .into();

        assert_eq!(context.render("EMPTY").as_deref(), Some(""));
        assert_eq!(context.render("FLAG").as_deref(), Some("true"));
        assert_eq!(context.render("LIST"), None);
        assert_eq!(context.render("MISSING"), None);
    }

    #[test]
    fn test_deserializes_from_json_object() {
        let context: GenerationContext = serde_json::from_str(r#"{"dept":"ops"}"#).unwrap();
        assert_eq!(context.render("DEPT").as_deref(), Some("ops"));
        assert_eq!(context.len(), 1);
    }
}
