//! Template Resolution - `${path}` substitution
//!
//! Templates are parsed once at workflow load into a segment list, so
//! runtime resolution is a walk over the context snapshot with no
//! re-parsing. `${path?}` marks a reference nullable: an unresolved
//! nullable reference yields `null` instead of an error.
//!
//! A template that is exactly one reference resolves to the raw `Value`
//! (structure preserved); mixed templates stringify each reference.

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::StrandError;

use super::path::ContextPath;

/// Pre-compiled scan for ${...} references
static REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").unwrap());

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Reference { path: ContextPath, nullable: bool },
}

/// A parsed template expression
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    raw: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parse a template, validating every embedded path
    pub fn parse(input: &str) -> Result<Self, StrandError> {
        let mut parts = Vec::new();
        let mut last_end = 0;

        for cap in REF_RE.captures_iter(input) {
            let m = cap.get(0).unwrap();
            if m.start() > last_end {
                parts.push(Part::Literal(input[last_end..m.start()].to_string()));
            }

            let inner = cap[1].trim();
            let (path_str, nullable) = match inner.strip_suffix('?') {
                Some(stripped) => (stripped.trim_end(), true),
                None => (inner, false),
            };
            let path = ContextPath::parse(path_str).map_err(|e| StrandError::TemplateParse {
                position: m.start(),
                details: e.to_string(),
            })?;
            parts.push(Part::Reference { path, nullable });

            last_end = m.end();
        }

        if last_end < input.len() {
            parts.push(Part::Literal(input[last_end..].to_string()));
        }

        Ok(Self {
            raw: input.to_string(),
            parts,
        })
    }

    /// The original template text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True when the template contains no references
    pub fn is_literal(&self) -> bool {
        self.parts
            .iter()
            .all(|p| matches!(p, Part::Literal(_)))
    }

    /// Resolve against a context snapshot.
    ///
    /// A pure single-reference template returns the referenced `Value`
    /// as-is; anything else produces a string.
    pub fn resolve(&self, root: &Value) -> Result<Value, StrandError> {
        // Structure-preserving fast path
        if let [Part::Reference { path, nullable }] = self.parts.as_slice() {
            return match path.resolve(root) {
                Some(v) => Ok(v.clone()),
                None if *nullable => Ok(Value::Null),
                None => path.resolve_strict(root).map(Value::clone),
            };
        }

        let mut result = String::with_capacity(self.raw.len() + 16);
        for part in &self.parts {
            match part {
                Part::Literal(s) => result.push_str(s),
                Part::Reference { path, nullable } => match path.resolve(root) {
                    Some(v) => result.push_str(&value_to_string(v)),
                    None if *nullable => result.push_str("null"),
                    None => {
                        // Surface the typed error (missing vs bad traversal)
                        path.resolve_strict(root)?;
                        unreachable!("resolve_strict must fail when resolve returned None");
                    }
                },
            }
        }
        Ok(Value::String(result))
    }

    /// Paths referenced by this template (for static validation)
    pub fn references(&self) -> impl Iterator<Item = &ContextPath> {
        self.parts.iter().filter_map(|p| match p {
            Part::Reference { path, .. } => Some(path),
            Part::Literal(_) => None,
        })
    }
}

/// Stringify a value for text interpolation: objects/arrays as compact JSON
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve a set of input bindings against a context snapshot into the
/// object a node invocation receives.
pub fn resolve_bindings(
    bindings: &[(String, Template)],
    root: &Value,
) -> Result<Value, StrandError> {
    let mut out = serde_json::Map::with_capacity(bindings.len());
    for (alias, template) in bindings {
        out.insert(alias.clone(), template.resolve(root)?);
    }
    Ok(Value::Object(out))
}

/// Parse a raw binding map into compiled `(alias, Template)` pairs
pub fn compile_bindings(
    raw: &FxHashMap<String, String>,
) -> Result<Vec<(String, Template)>, StrandError> {
    let mut compiled: Vec<(String, Template)> = Vec::with_capacity(raw.len());
    for (alias, text) in raw {
        compiled.push((alias.clone(), Template::parse(text)?));
    }
    // Deterministic resolution order regardless of map iteration order
    compiled.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(compiled)
}
