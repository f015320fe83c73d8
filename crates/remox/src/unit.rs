//! Mobile code units and the dehydrator
//!
//! A [`CodeUnit`] is a transportable callable: the name of the WebAssembly
//! module holding its logic, the entry function to call, the supporting
//! modules it requires, and its captured plain-data bindings. On top of that
//! it may carry three captured-context references — delegate, owner and
//! receiver — that resolve member lookups against the enclosing local scope.
//! Those references are never serializable; the [`Dehydrator`] severs them
//! before a unit crosses a process boundary.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::RemoxError;
use crate::value::Value;
use crate::Result;

/// Scope a code unit can resolve captured member lookups against
pub trait ScopeLookup: Send + Sync {
    /// Resolves a name against this scope, or reports it absent
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl ScopeLookup for BTreeMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// A transportable callable unit of mobile code
#[derive(Serialize, Deserialize)]
pub struct CodeUnit {
    module: String,
    entry: String,
    requires: Vec<String>,
    bindings: BTreeMap<String, Value>,
    dehydrated: bool,
    /// Dispatch target for unresolved member lookups
    #[serde(skip)]
    delegate: Option<Arc<dyn ScopeLookup>>,
    /// The enclosing scope this unit was built in
    #[serde(skip)]
    owner: Option<Arc<dyn ScopeLookup>>,
    /// The receiver the unit was created from
    #[serde(skip)]
    receiver: Option<Arc<dyn ScopeLookup>>,
}

impl CodeUnit {
    /// Starts building a unit whose logic lives in the named module
    pub fn builder(module: impl Into<String>) -> CodeUnitBuilder {
        CodeUnitBuilder {
            module: module.into(),
            entry: "run".to_string(),
            requires: Vec::new(),
            bindings: BTreeMap::new(),
            delegate: None,
            owner: None,
            receiver: None,
        }
    }

    /// The dotted name of the module holding the unit's logic
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The exported entry function
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Supporting modules the remote side must resolve before execution
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// The captured plain-data bindings
    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    /// True once the captured context has been stripped for transport
    pub fn is_dehydrated(&self) -> bool {
        self.dehydrated
    }

    /// True while any captured-context reference is still attached
    pub fn has_captured_context(&self) -> bool {
        self.delegate.is_some() || self.owner.is_some() || self.receiver.is_some()
    }

    /// Resolves a name against the unit's bindings, then its captured
    /// context in delegate, owner, receiver order.
    ///
    /// After dehydration only the plain-data bindings remain reachable.
    pub fn resolve_name(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.get(name) {
            return Some(value.clone());
        }
        for scope in [&self.delegate, &self.owner, &self.receiver].into_iter().flatten() {
            if let Some(value) = scope.lookup(name) {
                return Some(value);
            }
        }
        None
    }

    /// Guards local invocation: a dehydrated unit is single-use for
    /// transport and must not run in the issuing process anymore.
    pub fn ensure_locally_invocable(&self) -> Result<()> {
        if self.dehydrated {
            return Err(RemoxError::UnitState(
                "unit has been dehydrated for transport and can no longer be invoked locally"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("module", &self.module)
            .field("entry", &self.entry)
            .field("requires", &self.requires)
            .field("bindings", &self.bindings.len())
            .field("dehydrated", &self.dehydrated)
            .field("delegate", &self.delegate.is_some())
            .field("owner", &self.owner.is_some())
            .field("receiver", &self.receiver.is_some())
            .finish()
    }
}

/// Builder for [`CodeUnit`]
pub struct CodeUnitBuilder {
    module: String,
    entry: String,
    requires: Vec<String>,
    bindings: BTreeMap<String, Value>,
    delegate: Option<Arc<dyn ScopeLookup>>,
    owner: Option<Arc<dyn ScopeLookup>>,
    receiver: Option<Arc<dyn ScopeLookup>>,
}

impl CodeUnitBuilder {
    /// Sets the exported entry function (default `run`)
    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    /// Adds a supporting module requirement
    pub fn requires(mut self, module: impl Into<String>) -> Self {
        self.requires.push(module.into());
        self
    }

    /// Captures a plain-data binding
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// Attaches the dispatch delegate
    pub fn delegate(mut self, delegate: Arc<dyn ScopeLookup>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Attaches the enclosing owner scope
    pub fn owner(mut self, owner: Arc<dyn ScopeLookup>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Attaches the receiver reference
    pub fn receiver(mut self, receiver: Arc<dyn ScopeLookup>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Builds the unit
    pub fn build(self) -> CodeUnit {
        CodeUnit {
            module: self.module,
            entry: self.entry,
            requires: self.requires,
            bindings: self.bindings,
            dehydrated: false,
            delegate: self.delegate,
            owner: self.owner,
            receiver: self.receiver,
        }
    }
}

/// Strips a unit's captured execution context before transmission.
///
/// Clearing is per-field and best-effort in spirit: each of the three
/// references is dropped independently, and dehydrating an already
/// dehydrated unit is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dehydrator;

impl Dehydrator {
    /// Creates a dehydrator
    pub fn new() -> Self {
        Self
    }

    /// Clears the delegate, owner and receiver references and marks the
    /// unit as transport-only. Idempotent.
    pub fn dehydrate(&self, unit: &mut CodeUnit) {
        unit.delegate = None;
        unit.owner = None;
        unit.receiver = None;
        if !unit.dehydrated {
            trace!(module = %unit.module, "Dehydrated code unit");
            unit.dehydrated = true;
        }
    }

    /// Dehydrates the value if it is a code unit; anything else is left
    /// untouched.
    pub fn dehydrate_any(&self, value: &mut dyn Any) {
        if let Some(unit) = value.downcast_mut::<CodeUnit>() {
            self.dehydrate(unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(pairs: &[(&str, i64)]) -> Arc<dyn ScopeLookup> {
        let map: BTreeMap<String, Value> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), Value::I64(*value)))
            .collect();
        Arc::new(map)
    }

    fn hydrated_unit() -> CodeUnit {
        CodeUnit::builder("demo.probe")
            .bind("threshold", 10i64)
            .delegate(scope(&[("delegated", 1)]))
            .owner(scope(&[("owned", 2)]))
            .receiver(scope(&[("received", 3)]))
            .build()
    }

    #[test]
    fn test_scope_resolution_order() {
        let unit = hydrated_unit();
        assert_eq!(unit.resolve_name("threshold"), Some(Value::I64(10)));
        assert_eq!(unit.resolve_name("delegated"), Some(Value::I64(1)));
        assert_eq!(unit.resolve_name("owned"), Some(Value::I64(2)));
        assert_eq!(unit.resolve_name("received"), Some(Value::I64(3)));
        assert_eq!(unit.resolve_name("absent"), None);
    }

    #[test]
    fn test_dehydration_clears_all_three_fields() {
        let mut unit = hydrated_unit();
        assert!(unit.has_captured_context());

        Dehydrator::new().dehydrate(&mut unit);
        assert!(unit.is_dehydrated());
        assert!(!unit.has_captured_context());
        // Plain-data bindings survive; enclosing scope is gone.
        assert_eq!(unit.resolve_name("threshold"), Some(Value::I64(10)));
        assert_eq!(unit.resolve_name("owned"), None);
    }

    #[test]
    fn test_dehydration_is_idempotent() {
        let mut once = hydrated_unit();
        let dehydrator = Dehydrator::new();
        dehydrator.dehydrate(&mut once);

        let mut twice = hydrated_unit();
        dehydrator.dehydrate(&mut twice);
        dehydrator.dehydrate(&mut twice);

        assert_eq!(once.is_dehydrated(), twice.is_dehydrated());
        assert_eq!(once.has_captured_context(), twice.has_captured_context());
    }

    #[test]
    fn test_dehydrate_any_ignores_foreign_types() {
        let dehydrator = Dehydrator::new();
        let mut not_a_unit = String::from("plain value");
        dehydrator.dehydrate_any(&mut not_a_unit);
        assert_eq!(not_a_unit, "plain value");

        let mut unit = hydrated_unit();
        dehydrator.dehydrate_any(&mut unit);
        assert!(unit.is_dehydrated());
    }

    #[test]
    fn test_dehydrated_unit_refuses_local_invocation() {
        let mut unit = hydrated_unit();
        assert!(unit.ensure_locally_invocable().is_ok());
        Dehydrator::new().dehydrate(&mut unit);
        let err = unit.ensure_locally_invocable().unwrap_err();
        assert!(matches!(err, RemoxError::UnitState(_)));
    }

    #[test]
    fn test_captured_context_never_serializes() {
        let unit = hydrated_unit();
        let encoded = serde_json::to_string(&unit).unwrap();
        let decoded: CodeUnit = serde_json::from_str(&encoded).unwrap();
        assert!(!decoded.has_captured_context());
        assert_eq!(decoded.bindings().len(), 1);
        assert_eq!(decoded.module(), "demo.probe");
        assert_eq!(decoded.entry(), "run");
    }
}
