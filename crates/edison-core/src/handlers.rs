//! Handler registry: name-keyed guards,
//! conditions, and actions, loaded in layer order (bundled → pack → user →
//! project) with later layers overriding earlier ones for the same name.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::HandlerError;

/// A read-only view of the entity/session/config state a guard or
/// condition evaluates against.
pub type Context = BTreeMap<String, Value>;

/// A mutable subtree actions may write into (e.g. recording a completion
/// timestamp). Distinct from `Context` to keep guards provably read-only.
pub type MutableContext = BTreeMap<String, Value>;

/// `(context) -> bool`. MUST be fail-closed: return `false`, never panic or
/// error, on missing required keys.
pub trait Guard: Send + Sync {
    fn evaluate(&self, ctx: &Context) -> bool;
}

impl<F: Fn(&Context) -> bool + Send + Sync> Guard for F {
    fn evaluate(&self, ctx: &Context) -> bool {
        self(ctx)
    }
}

/// `(context) -> bool`, identical contract to [`Guard`]; kept as a distinct
/// trait because conditions and guards are registered in separate
/// namespaces even though their signature matches.
pub trait Condition: Send + Sync {
    fn evaluate(&self, ctx: &Context) -> bool;
}

impl<F: Fn(&Context) -> bool + Send + Sync> Condition for F {
    fn evaluate(&self, ctx: &Context) -> bool {
        self(ctx)
    }
}

/// `(context) -> void`, may mutate the provided subtree.
pub trait Action: Send + Sync {
    fn run(&self, ctx: &mut MutableContext);
}

impl<F: Fn(&mut MutableContext) + Send + Sync> Action for F {
    fn run(&self, ctx: &mut MutableContext) {
        self(ctx);
    }
}

/// When an action runs relative to a transition: before the guard/move, or
/// after it (optionally gated on a config flag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTiming {
    Before,
    After,
    ConfigGated(String),
}

/// Layers are loaded in this fixed order; later layers override earlier
/// registrations for the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandlerLayer {
    Bundled,
    Pack,
    User,
    Project,
}

/// The three name-keyed registries, built once at process init and
/// immutable thereafter.
#[derive(Default)]
pub struct HandlerRegistry {
    guards: BTreeMap<String, (HandlerLayer, Arc<dyn Guard>)>,
    conditions: BTreeMap<String, (HandlerLayer, Arc<dyn Condition>)>,
    actions: BTreeMap<String, (HandlerLayer, Arc<dyn Action>)>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a guard under `layer`. Overrides any prior registration of
    /// the same name from an earlier layer; a second registration within
    /// the *same* layer is a collision error — loading is deterministic.
    pub fn register_guard(
        &mut self,
        name: impl Into<String>,
        layer: HandlerLayer,
        guard: impl Guard + 'static,
    ) -> Result<(), HandlerError> {
        register(&mut self.guards, "guard", name, layer, Arc::new(guard))
    }

    pub fn register_condition(
        &mut self,
        name: impl Into<String>,
        layer: HandlerLayer,
        condition: impl Condition + 'static,
    ) -> Result<(), HandlerError> {
        register(&mut self.conditions, "condition", name, layer, Arc::new(condition))
    }

    pub fn register_action(
        &mut self,
        name: impl Into<String>,
        layer: HandlerLayer,
        action: impl Action + 'static,
    ) -> Result<(), HandlerError> {
        register(&mut self.actions, "action", name, layer, Arc::new(action))
    }

    pub fn guard(&self, name: &str) -> Result<&Arc<dyn Guard>, HandlerError> {
        self.guards
            .get(name)
            .map(|(_, g)| g)
            .ok_or_else(|| HandlerError::Unresolved {
                kind: "guard",
                name: name.to_string(),
            })
    }

    pub fn condition(&self, name: &str) -> Result<&Arc<dyn Condition>, HandlerError> {
        self.conditions
            .get(name)
            .map(|(_, c)| c)
            .ok_or_else(|| HandlerError::Unresolved {
                kind: "condition",
                name: name.to_string(),
            })
    }

    pub fn action(&self, name: &str) -> Result<&Arc<dyn Action>, HandlerError> {
        self.actions
            .get(name)
            .map(|(_, a)| a)
            .ok_or_else(|| HandlerError::Unresolved {
                kind: "action",
                name: name.to_string(),
            })
    }
}

fn register<T: ?Sized>(
    table: &mut BTreeMap<String, (HandlerLayer, Arc<T>)>,
    kind: &'static str,
    name: impl Into<String>,
    layer: HandlerLayer,
    value: Arc<T>,
) -> Result<(), HandlerError> {
    let name = name.into();
    if let Some((existing_layer, _)) = table.get(&name) {
        if *existing_layer == layer {
            return Err(HandlerError::DuplicateInLayer { kind, name });
        }
    }
    table.insert(name, (layer, value));
    Ok(())
}

fn ctx_bool(ctx: &Context, key: &str) -> bool {
    ctx.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn ctx_array_empty(ctx: &Context, key: &str) -> bool {
    ctx.get(key).and_then(Value::as_array).is_none_or(Vec::is_empty)
}

/// Installs every required built-in handler into `registry`
/// at [`HandlerLayer::Bundled`]. Higher layers (pack/user/project) may still
/// override any of these by registering the same name.
pub fn register_builtins(registry: &mut HandlerRegistry) -> Result<(), HandlerError> {
    use HandlerLayer::Bundled;

    registry.register_guard("always_allow", Bundled, |_: &Context| true)?;
    registry.register_guard("fail_closed", Bundled, |_: &Context| false)?;
    registry.register_guard("can_start_task", Bundled, |ctx: &Context| {
        ctx_array_empty(ctx, "unmet_dependencies")
    })?;
    registry.register_guard("can_finish_task", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "has_implementation_report") && ctx_bool(ctx, "has_required_evidence")
    })?;
    registry.register_guard("has_blockers", Bundled, |ctx: &Context| {
        !ctx_array_empty(ctx, "blocker_reasons")
    })?;
    registry.register_guard("requires_rollback_reason", Bundled, |ctx: &Context| {
        ctx.get("reason")
            .and_then(Value::as_str)
            .is_some_and(|r| !r.is_empty())
    })?;
    registry.register_guard("can_activate_session", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "session_has_owner")
    })?;
    registry.register_guard("can_complete_session", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "all_work_complete")
    })?;
    registry.register_guard("has_session_blockers", Bundled, |ctx: &Context| {
        !ctx_array_empty(ctx, "session_blockers")
    })?;
    registry.register_guard("is_session_ready", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "session_has_owner")
    })?;
    registry.register_guard("can_start_qa", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "task_ready_for_qa")
    })?;
    registry.register_guard("can_validate_qa", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "has_validator_reports")
    })?;
    registry.register_guard("has_validator_reports", Bundled, |ctx: &Context| {
        !ctx_array_empty(ctx, "validator_reports")
    })?;
    registry.register_guard("has_all_waves_passed", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "all_waves_passed")
    })?;
    registry.register_guard("has_bundle_approval", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "bundle_approved")
    })?;

    registry.register_condition("all_work_complete", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "all_work_complete")
    })?;
    registry.register_condition("no_pending_commits", Bundled, |ctx: &Context| {
        !ctx_bool(ctx, "has_pending_commits")
    })?;
    registry.register_condition("ready_to_close", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "all_work_complete") && !ctx_bool(ctx, "has_pending_commits")
    })?;
    registry.register_condition("has_task", Bundled, |ctx: &Context| ctx.contains_key("task_id"))?;
    registry.register_condition("task_claimed", Bundled, |ctx: &Context| {
        ctx.get("task_session_id").is_some()
    })?;
    registry.register_condition("task_ready_for_qa", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "task_ready_for_qa")
    })?;
    registry.register_condition("validation_failed", Bundled, |ctx: &Context| {
        ctx.get("verdict").and_then(Value::as_str) == Some("reject")
    })?;
    registry.register_condition("dependencies_missing", Bundled, |ctx: &Context| {
        !ctx_array_empty(ctx, "unmet_dependencies")
    })?;
    registry.register_condition("has_blocker_reason", Bundled, |ctx: &Context| {
        ctx.get("reason")
            .and_then(Value::as_str)
            .is_some_and(|r| !r.is_empty())
    })?;
    registry.register_condition("blockers_resolved", Bundled, |ctx: &Context| {
        ctx_array_empty(ctx, "blocker_reasons")
    })?;
    registry.register_condition("session_has_owner", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "session_has_owner")
    })?;
    registry.register_condition("all_tasks_validated", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "all_tasks_validated")
    })?;
    registry.register_condition("has_required_evidence", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "has_required_evidence")
    })?;
    registry.register_condition("all_blocking_validators_passed", Bundled, |ctx: &Context| {
        ctx_bool(ctx, "all_blocking_validators_passed")
    })?;

    registry.register_action("record_completion_time", Bundled, |ctx: &mut MutableContext| {
        ctx.insert(
            "completed_at".to_string(),
            Value::String(crate::io::now().to_rfc3339()),
        );
    })?;
    registry.register_action("record_blocker_reason", Bundled, |_: &mut MutableContext| {})?;
    registry.register_action("record_closed", Bundled, |ctx: &mut MutableContext| {
        ctx.insert(
            "closed_at".to_string(),
            Value::String(crate::io::now().to_rfc3339()),
        );
    })?;
    registry.register_action("log_transition", Bundled, |_: &mut MutableContext| {})?;
    registry.register_action("create_worktree", Bundled, |_: &mut MutableContext| {})?;
    registry.register_action("cleanup_worktree", Bundled, |_: &mut MutableContext| {})?;
    registry.register_action("record_activation_time", Bundled, |ctx: &mut MutableContext| {
        ctx.insert(
            "activated_at".to_string(),
            Value::String(crate::io::now().to_rfc3339()),
        );
    })?;
    registry.register_action("notify_session_start", Bundled, |_: &mut MutableContext| {})?;
    registry.register_action("finalize_session", Bundled, |_: &mut MutableContext| {})?;
    registry.register_action("validate_prerequisites", Bundled, |_: &mut MutableContext| {})?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_are_fail_closed_on_missing_keys() {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry).unwrap();
        let ctx = Context::new();
        assert!(!registry.guard("can_start_task").unwrap().evaluate(&ctx));
        assert!(!registry.guard("can_finish_task").unwrap().evaluate(&ctx));
        assert!(!registry.guard("has_bundle_approval").unwrap().evaluate(&ctx));
    }

    #[test]
    fn always_allow_and_fail_closed_are_constants() {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry).unwrap();
        let ctx = Context::new();
        assert!(registry.guard("always_allow").unwrap().evaluate(&ctx));
        assert!(!registry.guard("fail_closed").unwrap().evaluate(&ctx));
    }

    #[test]
    fn duplicate_registration_in_same_layer_errors() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_guard("custom", HandlerLayer::Project, |_: &Context| true)
            .unwrap();
        let err = registry
            .register_guard("custom", HandlerLayer::Project, |_: &Context| false)
            .unwrap_err();
        assert!(matches!(err, HandlerError::DuplicateInLayer { .. }));
    }

    #[test]
    fn later_layer_overrides_earlier_layer() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_guard("g", HandlerLayer::Bundled, |_: &Context| false)
            .unwrap();
        registry
            .register_guard("g", HandlerLayer::Project, |_: &Context| true)
            .unwrap();
        assert!(registry.guard("g").unwrap().evaluate(&Context::new()));
    }

    #[test]
    fn unresolved_handler_is_an_error() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.guard("nope"),
            Err(HandlerError::Unresolved { .. })
        ));
    }
}
