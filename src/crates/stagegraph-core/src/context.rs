//! The per-run [`Context`] store (§4.B): a typed key/value bag with
//! snapshot/restore and update-merge, single-writer per run.
//!
//! Values are opaque JSON to the engine; typed accessors perform
//! best-effort string coercion rather than failing. `set` always succeeds —
//! the only error surface is [`TypeMismatch`] at the typed-accessor layer,
//! and this module doesn't even need that today since every accessor here
//! degrades gracefully to a default instead of erroring, matching "Missing
//! keys resolve to `""`, never fail" from the condition evaluator's world.

use serde_json::Value;
use std::collections::HashMap;

/// A process-local, single-writer key/value bag scoped to one run.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String accessor with a default for missing or non-string values,
    /// coercing numbers/bools to their display form rather than failing.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Bulk-merge an outcome's `contextUpdates` (or any other map) into the
    /// store, overwriting existing keys.
    pub fn apply_updates(&mut self, updates: &HashMap<String, Value>) {
        for (k, v) in updates {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// A deep, independently-owned copy suitable for checkpoint persistence.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.clone()
    }

    /// Restore from a previously taken snapshot (checkpoint resume).
    pub fn restore(snapshot: HashMap<String, Value>) -> Self {
        Self { values: snapshot }
    }

    /// An independent copy for handing to a sub-execution (sub-agent,
    /// loop-restart) that must not observe the parent's later mutations.
    pub fn clone_isolated(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_key_resolves_to_default_not_error() {
        let ctx = Context::new();
        assert_eq!(ctx.get_string("nope", ""), "");
        assert_eq!(ctx.get_string("nope", "fallback"), "fallback");
    }

    #[test]
    fn apply_updates_merges_without_clearing_other_keys() {
        let mut ctx = Context::new();
        ctx.set("a", json!("1"));
        let mut updates = HashMap::new();
        updates.insert("b".to_string(), json!("2"));
        ctx.apply_updates(&updates);
        assert_eq!(ctx.get_string("a", ""), "1");
        assert_eq!(ctx.get_string("b", ""), "2");
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut ctx = Context::new();
        ctx.set("k", json!(42));
        let snap = ctx.snapshot();
        let restored = Context::restore(snap);
        assert_eq!(restored.get_string("k", ""), "42");
    }
}
