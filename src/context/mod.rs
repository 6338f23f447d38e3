// Module: Context
// Per-story state: variable store, step-output store, reference resolution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::extractors::navigate_path;

// `${{ steps.ID.outputs.PATH }}` is matched before the short forms so the
// double braces never leak into the variable-reference pass.
static STEP_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{\{\s*steps\.([A-Za-z0-9_\-]+)\.outputs\.([A-Za-z0-9_.\[\]*'\x22 =?@()\-]+?)\s*\}\}")
        .expect("valid step reference regex")
});

// `${name}` or `{name}`. Names are plain identifiers with optional dotted /
// bracketed path tails (`{inv.items[0].id}`).
static VAR_REF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$?\{([A-Za-z0-9_\-]+(?:[.\[][A-Za-z0-9_.\[\]'\x22\-]*)?)\}")
        .expect("valid variable reference regex")
});

/// A reference pointed at a variable or step output that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnboundReference {
    pub reference: String,
}

impl std::fmt::Display for UnboundReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "referência '{}' não resolvida", self.reference)
    }
}

impl std::error::Error for UnboundReference {}

/// Outputs recorded for one executed step, keyed by output name.
/// Always contains `result`, `status`, `message` and `duration`.
pub type StepOutputs = Map<String, Value>;

/// Holds the execution state of exactly one story run.
/// Created before setup, dropped after cleanup; never shared across stories.
#[derive(Debug, Default)]
pub struct StoryContext {
    variables: HashMap<String, Value>,
    step_outputs: HashMap<String, StepOutputs>,
}

impl StoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a variable. Only called after the producing action succeeded.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Snapshot of the variable store, for step records.
    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// Records the outputs of a step under its step-id.
    pub fn record_step(&mut self, step_id: impl Into<String>, outputs: StepOutputs) {
        self.step_outputs.insert(step_id.into(), outputs);
    }

    pub fn step_output(&self, step_id: &str) -> Option<&StepOutputs> {
        self.step_outputs.get(step_id)
    }

    /// Resolves every reference expression inside a string.
    ///
    /// When the whole string is a single reference the typed value is
    /// returned; references embedded in a larger string are replaced by
    /// their string form. Resolution is eager and happens just before the
    /// enclosing action runs.
    pub fn resolve_str(&self, input: &str) -> Result<Value, UnboundReference> {
        let trimmed = input.trim();

        // Whole-string single reference keeps the stored type.
        if let Some(caps) = STEP_REF_RE.captures(trimmed) {
            if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
                return self.resolve_step_ref(&caps[1], &caps[2]);
            }
        }
        if let Some(caps) = VAR_REF_RE.captures(trimmed) {
            if caps.get(0).map(|m| m.as_str()) == Some(trimmed) {
                return self.resolve_var_ref(&caps[1]);
            }
        }

        // Embedded references: substitute string forms left to right.
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in STEP_REF_RE.captures_iter(input) {
            let whole = caps.get(0).unwrap();
            out.push_str(&input[last..whole.start()]);
            let value = self.resolve_step_ref(&caps[1], &caps[2])?;
            out.push_str(&value_as_string(&value));
            last = whole.end();
        }
        out.push_str(&input[last..]);

        let pass1 = out;
        let mut out = String::with_capacity(pass1.len());
        let mut last = 0;
        for caps in VAR_REF_RE.captures_iter(&pass1) {
            let whole = caps.get(0).unwrap();
            out.push_str(&pass1[last..whole.start()]);
            let value = self.resolve_var_ref(&caps[1])?;
            out.push_str(&value_as_string(&value));
            last = whole.end();
        }
        out.push_str(&pass1[last..]);

        Ok(Value::String(out))
    }

    /// Recursively resolves references inside a JSON value.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, UnboundReference> {
        match value {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(self.resolve_value(item)?);
                }
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Object(resolved))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Resolves a source operand: either a bound variable name or, failing
    /// that, a literal JSON value. Used by compare_states and friends.
    pub fn resolve_operand(&self, operand: &str) -> Result<Value, UnboundReference> {
        if let Some(value) = self.variables.get(operand) {
            return Ok(value.clone());
        }
        // Literal JSON (`{"a":1}`, `[1,2]`, `42`). Nomes nus de variável
        // não parseiam como JSON, então não há ambiguidade.
        if let Ok(literal) = serde_json::from_str::<Value>(operand) {
            return Ok(literal);
        }
        // Por fim, a forma de expressão de referência (`${var}`).
        if operand.contains('{') {
            return self.resolve_str(operand);
        }
        Err(UnboundReference {
            reference: operand.to_string(),
        })
    }

    fn resolve_var_ref(&self, path: &str) -> Result<Value, UnboundReference> {
        // Split the leading identifier from an optional path tail.
        let (name, tail) = match path.find(['.', '[']) {
            Some(idx) => (&path[..idx], &path[idx..]),
            None => (path, ""),
        };
        let root = self.variables.get(name).ok_or_else(|| UnboundReference {
            reference: name.to_string(),
        })?;
        if tail.is_empty() {
            return Ok(root.clone());
        }
        navigate_path(root, tail.trim_start_matches('.')).map_err(|_| UnboundReference {
            reference: path.to_string(),
        })
    }

    fn resolve_step_ref(&self, step_id: &str, path: &str) -> Result<Value, UnboundReference> {
        let outputs = self.step_outputs.get(step_id).ok_or_else(|| UnboundReference {
            reference: format!("steps.{}", step_id),
        })?;
        let (name, tail) = match path.find(['.', '[']) {
            Some(idx) => (&path[..idx], &path[idx..]),
            None => (path, ""),
        };
        let root = outputs.get(name).ok_or_else(|| UnboundReference {
            reference: format!("steps.{}.outputs.{}", step_id, name),
        })?;
        if tail.is_empty() {
            return Ok(root.clone());
        }
        navigate_path(root, tail.trim_start_matches('.')).map_err(|_| UnboundReference {
            reference: format!("steps.{}.outputs.{}", step_id, path),
        })
    }
}

/// String form used when a reference is embedded in a larger string:
/// strings stay bare, everything else serializes compactly.
pub fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx_with(name: &str, value: Value) -> StoryContext {
        let mut ctx = StoryContext::new();
        ctx.set_var(name, value);
        ctx
    }

    #[test]
    fn test_whole_string_var_ref_keeps_type() {
        let ctx = ctx_with("hp", json!(20.0));
        assert_eq!(ctx.resolve_str("${hp}").unwrap(), json!(20.0));
        assert_eq!(ctx.resolve_str("{hp}").unwrap(), json!(20.0));
    }

    #[test]
    fn test_embedded_var_ref_becomes_string() {
        let ctx = ctx_with("player", json!("tester"));
        assert_eq!(
            ctx.resolve_str("tp ${player} 0 64 0").unwrap(),
            json!("tp tester 0 64 0")
        );
    }

    #[test]
    fn test_unbound_var_is_an_error() {
        let ctx = StoryContext::new();
        let err = ctx.resolve_str("${missing}").unwrap_err();
        assert_eq!(err.reference, "missing");
    }

    #[test]
    fn test_step_output_ref() {
        let mut ctx = StoryContext::new();
        let mut outputs = Map::new();
        outputs.insert("result".to_string(), json!({"x": 1.0, "world": "overworld"}));
        ctx.record_step("p1", outputs);

        let whole = ctx.resolve_str("${{ steps.p1.outputs.result }}").unwrap();
        assert_eq!(whole, json!({"x": 1.0, "world": "overworld"}));

        let path = ctx.resolve_str("${{ steps.p1.outputs.result.world }}").unwrap();
        assert_eq!(path, json!("overworld"));
    }

    #[test]
    fn test_step_ref_unexecuted_step_is_unbound() {
        let ctx = StoryContext::new();
        let err = ctx.resolve_str("${{ steps.nope.outputs.result }}").unwrap_err();
        assert!(err.reference.contains("steps.nope"));
    }

    #[test]
    fn test_var_ref_with_path_tail() {
        let ctx = ctx_with("inv", json!({"items": [{"id": "diamond_sword"}]}));
        assert_eq!(
            ctx.resolve_str("${inv.items[0].id}").unwrap(),
            json!("diamond_sword")
        );
    }

    #[test]
    fn test_resolve_value_recurses() {
        let ctx = ctx_with("who", json!("z1"));
        let input = json!({"entity": "${who}", "nested": ["${who}", 3]});
        let resolved = ctx.resolve_value(&input).unwrap();
        assert_eq!(resolved, json!({"entity": "z1", "nested": ["z1", 3]}));
    }

    #[test]
    fn test_resolve_operand_variable_then_literal() {
        let ctx = ctx_with("state", json!({"a": 1}));
        assert_eq!(ctx.resolve_operand("state").unwrap(), json!({"a": 1}));
        assert_eq!(ctx.resolve_operand("{\"b\":2}").unwrap(), json!({"b": 2}));
        assert!(ctx.resolve_operand("never_bound").is_err());
    }

    #[test]
    fn test_failed_action_leaves_store_unchanged() {
        // O contrato: storeAs grava só depois de sucesso. O orquestrador
        // simplesmente não chama set_var em falha; aqui garantimos que o
        // store não tem side effects escondidos.
        let ctx = ctx_with("kept", json!(1));
        assert!(ctx.get_var("kept").is_some());
        assert!(ctx.get_var("never_set").is_none());
    }
}
