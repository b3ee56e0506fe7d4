//! Context Paths - `a.b[0].c` parsed once, resolved by walking the tree
//!
//! Paths address subtrees of the execution context. Segments are either
//! object keys or array indices; parsing happens at workflow load so
//! resolution is a pure walk with no re-parsing.

use smallvec::SmallVec;

use serde_json::Value;

use crate::error::StrandError;

/// One step of a context path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed context path
///
/// Most paths have 2-4 segments (`nodes.fetch.output.body`), so segments
/// are stack-allocated.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPath {
    raw: String,
    segments: SmallVec<[Segment; 4]>,
}

impl ContextPath {
    /// Parse a path like `nodes.fetch.output.items[0].name`
    pub fn parse(input: &str) -> Result<Self, StrandError> {
        let mut segments: SmallVec<[Segment; 4]> = SmallVec::new();
        let bytes = input.as_bytes();
        let mut pos = 0;

        if input.is_empty() {
            return Err(StrandError::TemplateParse {
                position: 0,
                details: "empty path".to_string(),
            });
        }

        while pos < bytes.len() {
            match bytes[pos] {
                b'[' => {
                    let close = input[pos..].find(']').ok_or(StrandError::TemplateParse {
                        position: pos,
                        details: "unclosed '['".to_string(),
                    })? + pos;
                    let idx: usize =
                        input[pos + 1..close]
                            .parse()
                            .map_err(|_| StrandError::TemplateParse {
                                position: pos + 1,
                                details: format!(
                                    "invalid array index '{}'",
                                    &input[pos + 1..close]
                                ),
                            })?;
                    segments.push(Segment::Index(idx));
                    pos = close + 1;
                }
                b'.' => {
                    // Separator; a trailing or doubled dot is malformed
                    pos += 1;
                    if pos >= bytes.len() || bytes[pos] == b'.' || bytes[pos] == b'[' {
                        return Err(StrandError::TemplateParse {
                            position: pos,
                            details: "expected identifier after '.'".to_string(),
                        });
                    }
                }
                _ => {
                    let start = pos;
                    while pos < bytes.len() && bytes[pos] != b'.' && bytes[pos] != b'[' {
                        let c = bytes[pos] as char;
                        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                            return Err(StrandError::TemplateParse {
                                position: pos,
                                details: format!("invalid character '{}' in path", c),
                            });
                        }
                        pos += 1;
                    }
                    segments.push(Segment::Key(input[start..pos].to_string()));
                }
            }
        }

        Ok(Self {
            raw: input.to_string(),
            segments,
        })
    }

    /// The original path text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// First segment key, if the path starts with one
    pub fn head(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// Walk the tree; `None` when any segment is missing
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                Segment::Key(k) => current.get(k.as_str())?,
                Segment::Index(i) => current.get(*i)?,
            };
        }
        Some(current)
    }

    /// Walk the tree with typed errors: missing field vs traversing a
    /// primitive value
    pub fn resolve_strict<'a>(&self, root: &'a Value) -> Result<&'a Value, StrandError> {
        let mut current = root;
        for segment in &self.segments {
            let next = match segment {
                Segment::Key(k) => current.get(k.as_str()),
                Segment::Index(i) => current.get(*i),
            };
            match next {
                Some(v) => current = v,
                None => {
                    if matches!(current, Value::Object(_) | Value::Array(_)) {
                        return Err(StrandError::PathNotFound {
                            path: self.raw.clone(),
                        });
                    }
                    let value_type = match current {
                        Value::Null => "null",
                        Value::Bool(_) => "bool",
                        Value::Number(_) => "number",
                        Value::String(_) => "string",
                        Value::Array(_) => "array",
                        Value::Object(_) => "object",
                    };
                    let segment_str = match segment {
                        Segment::Key(k) => k.clone(),
                        Segment::Index(i) => i.to_string(),
                    };
                    return Err(StrandError::InvalidTraversal {
                        segment: segment_str,
                        value_type: value_type.to_string(),
                        full_path: self.raw.clone(),
                    });
                }
            }
        }
        Ok(current)
    }

    /// Segments for tree mutation (see `ExecutionContext::set`)
    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl std::fmt::Display for ContextPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_path() {
        let path = ContextPath::parse("input.val").unwrap();
        assert_eq!(path.segments().len(), 2);
        assert_eq!(path.head(), Some("input"));
    }

    #[test]
    fn parse_path_with_index() {
        let path = ContextPath::parse("nodes.fetch.output.items[2]").unwrap();
        assert_eq!(path.segments().len(), 5);
        assert_eq!(path.segments()[4], Segment::Index(2));
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(ContextPath::parse("").is_err());
    }

    #[test]
    fn parse_rejects_trailing_dot() {
        let result = ContextPath::parse("a.b.");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("STRAND-030"));
    }

    #[test]
    fn parse_rejects_bad_index() {
        assert!(ContextPath::parse("a[x]").is_err());
        assert!(ContextPath::parse("a[1").is_err());
    }

    #[test]
    fn resolve_nested_value() {
        let root = json!({"nodes": {"fetch": {"output": {"body": "hello"}}}});
        let path = ContextPath::parse("nodes.fetch.output.body").unwrap();
        assert_eq!(path.resolve(&root).unwrap(), "hello");
    }

    #[test]
    fn resolve_array_index() {
        let root = json!({"input": {"items": ["a", "b", "c"]}});
        let path = ContextPath::parse("input.items[1]").unwrap();
        assert_eq!(path.resolve(&root).unwrap(), "b");
    }

    #[test]
    fn resolve_missing_returns_none() {
        let root = json!({"input": {}});
        let path = ContextPath::parse("input.missing").unwrap();
        assert!(path.resolve(&root).is_none());
    }

    #[test]
    fn resolve_strict_missing_field() {
        let root = json!({"input": {"a": 1}});
        let path = ContextPath::parse("input.b").unwrap();
        let err = path.resolve_strict(&root).unwrap_err();
        assert!(err.to_string().contains("STRAND-031"));
    }

    #[test]
    fn resolve_strict_primitive_traversal() {
        let root = json!({"input": {"a": 5}});
        let path = ContextPath::parse("input.a.deeper").unwrap();
        let err = path.resolve_strict(&root).unwrap_err();
        assert!(err.to_string().contains("STRAND-032"));
    }
}
