//! Error Handler Chain - map a node failure to a policy outcome
//!
//! Ordered handlers, each with an optional regex on node id and an error
//! kind set. Matching is first-match-wins. The engine consults the chain
//! only when the node has no local retry policy (node-local policy takes
//! precedence).

use regex::Regex;

use crate::ast::{ErrorHandlerDef, PolicyDef};
use crate::error::{ErrorKind, Result, StrandError};

struct CompiledHandler {
    pattern: Option<Regex>,
    errors: Vec<ErrorKind>,
    policy: PolicyDef,
}

impl CompiledHandler {
    fn matches(&self, node_id: &str, kind: ErrorKind) -> bool {
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(node_id) {
                return false;
            }
        }
        self.errors.is_empty() || self.errors.contains(&kind)
    }
}

/// The compiled, ordered handler chain of one workflow
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<CompiledHandler>,
}

impl HandlerChain {
    /// Compile handler definitions; regex syntax was validated earlier
    pub fn compile(defs: &[ErrorHandlerDef]) -> Result<Self> {
        let mut handlers = Vec::with_capacity(defs.len());
        for def in defs {
            let pattern = match &def.nodes {
                Some(raw) => Some(Regex::new(raw).map_err(|e| StrandError::Validation {
                    reason: format!("invalid handler pattern '{}': {}", raw, e),
                })?),
                None => None,
            };
            handlers.push(CompiledHandler {
                pattern,
                errors: def.errors.clone(),
                policy: def.policy.clone(),
            });
        }
        Ok(Self { handlers })
    }

    /// First handler matching the node and error kind
    pub fn resolve(&self, node_id: &str, error: &StrandError) -> Option<&PolicyDef> {
        let kind = error.kind();
        self.handlers
            .iter()
            .find(|h| h.matches(node_id, kind))
            .map(|h| &h.policy)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::RetryPolicyDef;
    use serde_json::json;

    fn chain(yaml: &str) -> HandlerChain {
        let defs: Vec<ErrorHandlerDef> = serde_yaml::from_str(yaml).unwrap();
        HandlerChain::compile(&defs).unwrap()
    }

    fn timeout_error(node: &str) -> StrandError {
        StrandError::Timeout {
            node_id: node.to_string(),
            timeout_ms: 100,
        }
    }

    #[test]
    fn first_match_wins() {
        let chain = chain(
            r#"
- nodes: "fetch_.*"
  policy:
    skip: {}
- policy: escalate
"#,
        );

        let policy = chain.resolve("fetch_users", &timeout_error("fetch_users")).unwrap();
        assert!(matches!(policy, PolicyDef::Skip { .. }));

        let policy = chain.resolve("other", &timeout_error("other")).unwrap();
        assert_eq!(*policy, PolicyDef::Escalate);
    }

    #[test]
    fn error_kind_filter_applies() {
        let chain = chain(
            r#"
- errors: [timeout]
  policy:
    retry:
      max_attempts: 2
- policy: escalate
"#,
        );

        let policy = chain.resolve("n", &timeout_error("n")).unwrap();
        assert!(matches!(policy, PolicyDef::Retry(RetryPolicyDef { .. })));

        let validation = StrandError::Validation { reason: "x".into() };
        let policy = chain.resolve("n", &validation).unwrap();
        assert_eq!(*policy, PolicyDef::Escalate);
    }

    #[test]
    fn no_match_yields_none() {
        let chain = chain(
            r#"
- nodes: "^agent_"
  policy: compensate
"#,
        );
        assert!(chain.resolve("tool_x", &timeout_error("tool_x")).is_none());
    }

    #[test]
    fn empty_kind_list_matches_all_kinds() {
        let chain = chain(
            r#"
- policy:
    fallback:
      output: {"degraded": true}
"#,
        );
        let err = StrandError::Tool {
            tool_id: "t".into(),
            reason: "down".into(),
            retryable: false,
        };
        match chain.resolve("any", &err).unwrap() {
            PolicyDef::Fallback { output, .. } => {
                assert_eq!(output.as_ref().unwrap(), &json!({"degraded": true}));
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn invalid_regex_fails_compile() {
        let defs: Vec<ErrorHandlerDef> = serde_yaml::from_str(
            r#"
- nodes: "["
  policy: escalate
"#,
        )
        .unwrap();
        assert!(HandlerChain::compile(&defs).is_err());
    }
}
