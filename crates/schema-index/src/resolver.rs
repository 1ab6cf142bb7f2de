//! Local `$ref` resolver.
//!
//! Follows local JSON pointers (`#/...`) against the raw document value. References into
//! other documents are never fetched; they fail with [`IndexError::UnresolvedReference`] and the
//! caller records them as warnings.

use crate::error::{IndexError, Result};
use serde_json::Value;
use std::collections::HashSet;

const SCHEMA_PREFIX: &str = "#/components/schemas/";

#[derive(Debug, Clone, Copy)]
pub struct RefResolver<'a> {
    root: &'a Value,
}

impl<'a> RefResolver<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &'a Value {
        self.root
    }

    /// Look up the raw value a local reference points at.
    ///
    /// `~0`/`~1` escapes are handled by [`Value::pointer`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnresolvedReference`] for external references, malformed fragments
    /// and pointers that do not exist in the document.
    pub fn lookup(&self, reference: &str) -> Result<&'a Value> {
        let pointer = local_pointer(reference)?;
        self.root
            .pointer(pointer)
            .ok_or_else(|| unresolved(reference, format!("no value at pointer '{pointer}'")))
    }

    /// Follow a (possibly chained) `$ref` from `value` to the first non-reference value.
    ///
    /// Returns that value and, when at least one `$ref` was followed, the last reference that was
    /// dereferenced. A value without `$ref` is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnresolvedReference`] for cycles, missing targets and external
    /// references.
    pub fn follow(&self, value: &'a Value) -> Result<(&'a Value, Option<String>)> {
        let mut seen: HashSet<&'a str> = HashSet::new();
        let mut last: Option<&'a str> = None;
        let mut cur = value;

        while let Some(reference) = cur.get("$ref").and_then(Value::as_str) {
            if !seen.insert(reference) {
                return Err(unresolved(reference, "cyclic $ref chain".to_string()));
            }
            cur = self.lookup(reference)?;
            last = Some(reference);
        }
        Ok((cur, last.map(str::to_string)))
    }
}

/// Name of the model a `#/components/schemas/<name>` reference points at.
///
/// Pointers that reach inside a model (e.g. `#/components/schemas/Pet/properties/id`) are not
/// model references and return `None`.
#[must_use]
pub fn component_schema_name(reference: &str) -> Option<String> {
    let rest = reference.strip_prefix(SCHEMA_PREFIX)?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(unescape_token(rest))
}

/// JSON pointer of the named model `name`.
#[must_use]
pub fn component_schema_pointer(name: &str) -> String {
    format!("{SCHEMA_PREFIX}{}", escape_token(name))
}

fn local_pointer(reference: &str) -> Result<&str> {
    match reference.strip_prefix('#') {
        Some(ptr) if ptr.is_empty() || ptr.starts_with('/') => Ok(ptr),
        Some(_) => Err(unresolved(
            reference,
            "unsupported fragment (expected a JSON pointer starting with '/')".to_string(),
        )),
        None => Err(unresolved(
            reference,
            "external references are not followed".to_string(),
        )),
    }
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unresolved(reference: &str, reason: String) -> IndexError {
    IndexError::UnresolvedReference {
        reference: reference.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(r: &str) -> Value {
        json!({ "$ref": r })
    }

    fn doc() -> Value {
        json!({
            "components": {
                "schemas": {
                    "Pet": {"type": "object"},
                    "a/b": {"type": "string"},
                    "Alias": {"$ref": "#/components/schemas/Pet"},
                    "LoopA": {"$ref": "#/components/schemas/LoopB"},
                    "LoopB": {"$ref": "#/components/schemas/LoopA"}
                },
                "parameters": {
                    "Limit": {"name": "limit", "in": "query", "schema": {"type": "integer"}}
                }
            }
        })
    }

    #[test]
    fn lookup_handles_escaped_tokens() {
        let root = doc();
        let r = RefResolver::new(&root);
        let v = r.lookup("#/components/schemas/a~1b").unwrap();
        assert_eq!(v, &json!({"type": "string"}));
    }

    #[test]
    fn lookup_rejects_external_and_missing_refs() {
        let root = doc();
        let r = RefResolver::new(&root);
        let err = r.lookup("common.yaml#/components/schemas/Pet").unwrap_err();
        assert!(matches!(err, IndexError::UnresolvedReference { .. }));
        assert!(err.to_string().contains("external"));

        let err = r.lookup("#/components/schemas/Missing").unwrap_err();
        assert!(err.to_string().contains("no value at pointer"));
    }

    #[test]
    fn follow_walks_alias_chains() {
        let root = doc();
        let r = RefResolver::new(&root);
        let alias = reference("#/components/schemas/Alias");
        let (target, last) = r.follow(&alias).unwrap();
        assert_eq!(target, &json!({"type": "object"}));
        assert_eq!(last.as_deref(), Some("#/components/schemas/Pet"));
    }

    #[test]
    fn follow_detects_cycles() {
        let root = doc();
        let r = RefResolver::new(&root);
        let looped = reference("#/components/schemas/LoopA");
        let err = r.follow(&looped).unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn follow_returns_plain_values_unchanged() {
        let root = doc();
        let r = RefResolver::new(&root);
        let inline = json!({"name": "limit", "in": "query"});
        let (target, last) = r.follow(&inline).unwrap();
        assert_eq!(target, &inline);
        assert!(last.is_none());

        let param = reference("#/components/parameters/Limit");
        let (target, _) = r.follow(&param).unwrap();
        assert_eq!(target["name"], "limit");
    }

    #[test]
    fn component_schema_names() {
        assert_eq!(
            component_schema_name("#/components/schemas/Pet").as_deref(),
            Some("Pet")
        );
        assert_eq!(
            component_schema_name("#/components/schemas/a~1b").as_deref(),
            Some("a/b")
        );
        assert_eq!(
            component_schema_name("#/components/schemas/Pet/properties/id"),
            None
        );
        assert_eq!(component_schema_name("#/components/parameters/Limit"), None);
        assert_eq!(component_schema_pointer("a/b"), "#/components/schemas/a~1b");
    }
}
