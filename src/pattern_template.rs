//! Pattern templates and the tokenizer behind them.
//!
//! A pattern is literal text interleaved with `{NAME}` or `{NAME:PARAM}` tokens. The
//! scanner walks the string once, so a `{` seen while another token is still open is
//! reported as nesting instead of being matched by a looser expression.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::GeneratorError;

const TOKEN_WEIGHT: u32 = 10;
const PARAM_WEIGHT: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VariableToken {
    pub name: String,
    pub param: Option<String>,
}

impl VariableToken {
    pub fn new(name: impl Into<String>, param: Option<String>) -> Self {
        VariableToken {
            name: name.into(),
            param,
        }
    }

    /// The token exactly as it would appear in a pattern.
    pub fn raw(&self) -> String {
        match &self.param {
            Some(param) => format!("{{{}:{}}}", self.name, param),
            None => format!("{{{}}}", self.name),
        }
    }
}

impl fmt::Display for VariableToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.param {
            Some(param) => write!(f, "{}:{}", self.name, param),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Token(VariableToken),
}

/// Structural problems found while scanning. Positions are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxIssue {
    Unclosed { position: usize },
    Empty { position: usize },
    Nested { position: usize },
    UnexpectedClose { position: usize },
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxIssue::Unclosed { position } => {
                write!(f, "unclosed '{{' at position {}", position)
            }
            SyntaxIssue::Empty { position } => {
                write!(f, "empty variable '{{}}' at position {}", position)
            }
            SyntaxIssue::Nested { position } => {
                write!(f, "nested '{{' at position {} inside an open variable", position)
            }
            SyntaxIssue::UnexpectedClose { position } => {
                write!(f, "unbalanced '}}' at position {}", position)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    pub segments: Vec<Segment>,
    pub issues: Vec<SyntaxIssue>,
}

/// Splits a pattern into literal and token segments.
///
/// Malformed regions are kept as literal text so evaluation never loses characters.
pub fn scan(pattern: &str) -> Scan {
    let mut scan = Scan::default();
    let mut literal = String::new();
    let mut open: Option<usize> = None;

    for (pos, ch) in pattern.char_indices() {
        match ch {
            '{' => {
                if let Some(start) = open {
                    scan.issues.push(SyntaxIssue::Nested { position: pos });
                    literal.push_str(&pattern[start..pos]);
                }
                open = Some(pos);
            }
            '}' => match open.take() {
                Some(start) => {
                    let inner = &pattern[start + 1..pos];
                    if inner.is_empty() {
                        scan.issues.push(SyntaxIssue::Empty { position: start });
                        literal.push_str("{}");
                        continue;
                    }
                    if !literal.is_empty() {
                        scan.segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let token = match inner.split_once(':') {
                        Some((name, param)) => VariableToken::new(name, Some(param.to_string())),
                        None => VariableToken::new(inner, None),
                    };
                    scan.segments.push(Segment::Token(token));
                }
                None => {
                    scan.issues.push(SyntaxIssue::UnexpectedClose { position: pos });
                    literal.push('}');
                }
            },
            _ => {
                if open.is_none() {
                    literal.push(ch);
                }
            }
        }
    }

    if let Some(start) = open {
        scan.issues.push(SyntaxIssue::Unclosed { position: start });
        literal.push_str(&pattern[start..]);
    }
    if !literal.is_empty() {
        scan.segments.push(Segment::Literal(literal));
    }
    scan
}

/// `^[A-Z][A-Z0-9_]*$`
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

/// Immutable, pre-scanned pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternTemplate {
    pattern: String,
    scan: Scan,
}

impl PatternTemplate {
    pub fn new(pattern: impl Into<String>) -> Result<Self, GeneratorError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(GeneratorError::invalid_pattern(
                pattern,
                vec!["pattern must not be empty".to_string()],
            ));
        }
        let scan = scan(&pattern);
        Ok(PatternTemplate { pattern, scan })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.scan.segments
    }

    pub fn syntax_issues(&self) -> &[SyntaxIssue] {
        &self.scan.issues
    }

    /// Tokens in the order they appear, duplicates included.
    pub fn variables(&self) -> Vec<&VariableToken> {
        self.scan
            .segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Token(token) => Some(token),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Distinct variable names in first-seen order.
    pub fn variable_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for token in self.variables() {
            if !names.contains(&token.name.as_str()) {
                names.push(&token.name);
            }
        }
        names
    }

    pub fn has_counter(&self) -> bool {
        self.variables().iter().any(|token| token.name == "COUNTER")
    }

    pub fn complexity(&self) -> u32 {
        self.scan
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.chars().count() as u32,
                Segment::Token(token) if token.param.is_some() => TOKEN_WEIGHT + PARAM_WEIGHT,
                Segment::Token(_) => TOKEN_WEIGHT,
            })
            .sum()
    }
}

impl fmt::Display for PatternTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl FromStr for PatternTemplate {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternTemplate::new(s)
    }
}
