//! Declarative state-machine engine: drives
//! Task/QA/Session transitions against a YAML-declared specification of
//! guards, conditions, actions, and timing.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::domain::{Entity, EntityState};
use crate::error::TransitionError;
use crate::handlers::{ActionTiming, Context, HandlerRegistry, MutableContext};
use crate::repository::FileRepository;

/// Default timing for an action with no `when` declared.
fn default_when() -> String {
    "after".to_string()
}

/// One declared recommendation attached to a transition, surfaced to the
/// recommendation planner (component F).
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationSpec {
    pub id: String,
    pub entity: String,
    pub rationale: String,
    #[serde(default)]
    pub blocking: bool,
    pub cmd_template: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AltCondition {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionSpec {
    pub name: String,
    #[serde(default)]
    pub or: Vec<AltCondition>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default = "default_when")]
    pub when: String,
}

impl ActionSpec {
    #[must_use]
    pub fn timing(&self) -> ActionTiming {
        if self.when == "before" {
            ActionTiming::Before
        } else if let Some(path) = self.when.strip_prefix("config.") {
            ActionTiming::ConfigGated(path.to_string())
        } else {
            ActionTiming::After
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionSpec {
    pub to: String,
    pub guard: String,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<RecommendationSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateSpec {
    #[serde(default)]
    pub initial: bool,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allowed_transitions: Vec<TransitionSpec>,
}

/// The full declarative specification for one entity domain
/// (task/qa/session), as parsed from a config layer.
#[derive(Debug, Clone, Deserialize)]
pub struct StateMachineSpec {
    pub states: BTreeMap<String, StateSpec>,
}

impl StateMachineSpec {
    fn state(&self, name: &str) -> Result<&StateSpec, TransitionError> {
        self.states
            .get(name)
            .ok_or_else(|| TransitionError::UnknownState {
                state: name.to_string(),
            })
    }

    fn find_transition(&self, from: &str, to: &str) -> Result<&TransitionSpec, TransitionError> {
        self.state(from)?
            .allowed_transitions
            .iter()
            .find(|t| t.to == to)
            .ok_or_else(|| TransitionError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
    }
}

/// Outcome of a successful transition: the union of rule ids declared on
/// the transition, surfaced to callers and the recommendation engine.
#[derive(Debug, Clone, Default)]
pub struct TransitionOutcome {
    pub rules: Vec<String>,
}

fn config_path_truthy(config: Option<&crate::config::Config>, path: &str) -> bool {
    config
        .and_then(|c| c.domain::<serde_json::Value>(path).ok().flatten())
        .is_some_and(|v| match v {
            serde_json::Value::Bool(b) => b,
            serde_json::Value::Null => false,
            other => !other.is_null() && other != serde_json::Value::from(0),
        })
}

fn condition_passes(registry: &HandlerRegistry, spec: &ConditionSpec, ctx: &Context) -> Result<bool, TransitionError> {
    if registry.condition(&spec.name)?.evaluate(ctx) {
        return Ok(true);
    }
    for alt in &spec.or {
        if registry.condition(&alt.name)?.evaluate(ctx) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Runs the transition algorithm against `entity`, mutating
/// it and the backing repository file on success. Steps 3-6 execute before
/// any fallible action runs; step 7 (post-commit actions) never unwinds the
/// committed state change even if an action's effects are incomplete — the
/// caller logs such failures but the `Ok` result stands.
#[allow(clippy::too_many_arguments)]
pub async fn transition<E>(
    spec: &StateMachineSpec,
    registry: &HandlerRegistry,
    repo: &FileRepository<E>,
    entity: &mut E,
    to: E::State,
    context: &Context,
    mutable_context: &mut MutableContext,
    config: Option<&crate::config::Config>,
    reason: Option<String>,
) -> Result<TransitionOutcome, TransitionError>
where
    E: Entity,
{
    let from = entity.state();
    let from_name = from.to_string();
    let to_name = to.to_string();

    let transition_spec = spec.find_transition(&from_name, &to_name)?;

    if !from.can_transition_to(to) {
        return Err(TransitionError::InvalidTransition {
            from: from_name,
            to: to_name,
        });
    }

    for action in transition_spec
        .actions
        .iter()
        .filter(|a| a.timing() == ActionTiming::Before)
    {
        registry.action(&action.name)?.run(mutable_context);
    }

    if !registry.guard(&transition_spec.guard)?.evaluate(context) {
        return Err(TransitionError::GuardFailed {
            name: transition_spec.guard.clone(),
        });
    }

    for condition in &transition_spec.conditions {
        if !condition_passes(registry, condition, context)? {
            let reason = condition
                .error
                .clone()
                .unwrap_or_else(|| format!("condition '{}' failed", condition.name));
            return Err(TransitionError::ConditionFailed {
                name: condition.name.clone(),
                reason,
            });
        }
    }

    repo.move_state(entity.id(), from, to).await?;
    entity.apply_transition(to, reason, Vec::new());
    repo.save(entity).await?;

    for action in &transition_spec.actions {
        match action.timing() {
            ActionTiming::Before => {}
            ActionTiming::After => {
                registry.action(&action.name)?.run(mutable_context);
            }
            ActionTiming::ConfigGated(path) => {
                if config_path_truthy(config, &path) {
                    registry.action(&action.name)?.run(mutable_context);
                }
            }
        }
    }

    Ok(TransitionOutcome {
        rules: transition_spec.rules.clone(),
    })
}

/// Parses a declarative state-machine spec from a YAML source (a config
/// layer's `task.yaml`/`qa.yaml`/`session.yaml`,'s shape).
pub fn parse_spec(yaml: &str) -> Result<StateMachineSpec, serde_yaml::Error> {
    serde_yaml::from_str(yaml)
}

/// Every allowed transition out of `from` whose guard currently passes,
/// used by both the CLI-facing facade and the recommendation planner
/// (component F) to avoid duplicating guard-evaluation logic.
pub fn passable_transitions<'a>(
    spec: &'a StateMachineSpec,
    registry: &HandlerRegistry,
    from: &str,
    context: &Context,
) -> Vec<&'a TransitionSpec> {
    let Ok(state) = spec.state(from) else {
        return Vec::new();
    };
    state
        .allowed_transitions
        .iter()
        .filter(|t| {
            registry
                .guard(&t.guard)
                .is_ok_and(|g| g.evaluate(context))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Task, TaskKind, TaskState};
    use crate::handlers::register_builtins;
    use crate::identifiers::TaskId;
    use tempfile::TempDir;

    const TASK_SPEC_YAML: &str = r"
states:
  todo:
    initial: true
    allowed_transitions:
      - to: wip
        guard: can_start_task
        rules: [RULE.GUARDS.FAIL_CLOSED]
        actions:
          - name: log_transition
  wip:
    allowed_transitions:
      - to: done
        guard: can_finish_task
        conditions:
          - name: all_work_complete
            error: 'not all work complete'
  done:
    allowed_transitions:
      - to: validated
        guard: has_bundle_approval
  validated:
    final: true
";

    async fn setup() -> (TempDir, FileRepository<Task>, HandlerRegistry, StateMachineSpec) {
        let dir = TempDir::new().unwrap();
        let repo = FileRepository::new(dir.path().join("tasks"));
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry).unwrap();
        let spec = parse_spec(TASK_SPEC_YAML).unwrap();
        (dir, repo, registry, spec)
    }

    #[tokio::test]
    async fn successful_transition_moves_file_and_appends_history() {
        let (_dir, repo, registry, spec) = setup().await;
        let mut task = Task::new(TaskId::parse("T-001").unwrap(), "x".into(), TaskKind::Chore);
        repo.save(&task).await.unwrap();

        let mut ctx = Context::new();
        ctx.insert("unmet_dependencies".into(), serde_json::json!([]));
        let mut mutctx = MutableContext::new();

        let outcome = transition(&spec, &registry, &repo, &mut task, TaskState::Wip, &ctx, &mut mutctx, None, None)
            .await
            .unwrap();

        assert_eq!(task.state, TaskState::Wip);
        assert_eq!(task.state_history.len(), 2);
        assert_eq!(outcome.rules, vec!["RULE.GUARDS.FAIL_CLOSED".to_string()]);

        let reloaded = repo.get(&task.id).await.unwrap();
        assert_eq!(reloaded.state, TaskState::Wip);
    }

    #[tokio::test]
    async fn guard_failure_leaves_entity_unchanged() {
        let (_dir, repo, registry, spec) = setup().await;
        let mut task = Task::new(TaskId::parse("T-001").unwrap(), "x".into(), TaskKind::Chore);
        repo.save(&task).await.unwrap();

        let mut ctx = Context::new();
        ctx.insert("unmet_dependencies".into(), serde_json::json!(["T-000"]));
        let mut mutctx = MutableContext::new();

        let err = transition(&spec, &registry, &repo, &mut task, TaskState::Wip, &ctx, &mut mutctx, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, TransitionError::GuardFailed { .. }));
        assert_eq!(task.state, TaskState::Todo);
        let reloaded = repo.get(&task.id).await.unwrap();
        assert_eq!(reloaded.state, TaskState::Todo);
    }

    #[tokio::test]
    async fn condition_failure_is_reported_with_its_error_message() {
        let (_dir, repo, registry, spec) = setup().await;
        let mut task = Task::new(TaskId::parse("T-001").unwrap(), "x".into(), TaskKind::Chore);
        task.record_transition(TaskState::Wip, None, vec![]);
        repo.save(&task).await.unwrap();

        let mut ctx = Context::new();
        ctx.insert("has_implementation_report".into(), serde_json::json!(true));
        ctx.insert("has_required_evidence".into(), serde_json::json!(true));
        ctx.insert("all_work_complete".into(), serde_json::json!(false));
        let mut mutctx = MutableContext::new();

        let err = transition(&spec, &registry, &repo, &mut task, TaskState::Done, &ctx, &mut mutctx, None, None)
            .await
            .unwrap_err();

        match err {
            TransitionError::ConditionFailed { name, reason } => {
                assert_eq!(name, "all_work_complete");
                assert_eq!(reason, "not all work complete");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_target_state_is_invalid_transition() {
        let (_dir, repo, registry, spec) = setup().await;
        let mut task = Task::new(TaskId::parse("T-001").unwrap(), "x".into(), TaskKind::Chore);
        repo.save(&task).await.unwrap();

        let ctx = Context::new();
        let mut mutctx = MutableContext::new();
        let err = transition(&spec, &registry, &repo, &mut task, TaskState::Done, &ctx, &mut mutctx, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn passable_transitions_filters_by_guard() {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry).unwrap();
        let spec = parse_spec(TASK_SPEC_YAML).unwrap();

        let mut ctx = Context::new();
        ctx.insert("unmet_dependencies".into(), serde_json::json!(["blocker"]));
        let passable = passable_transitions(&spec, &registry, "todo", &ctx);
        assert!(passable.is_empty());

        let mut ctx2 = Context::new();
        ctx2.insert("unmet_dependencies".into(), serde_json::json!([]));
        let passable2 = passable_transitions(&spec, &registry, "todo", &ctx2);
        assert_eq!(passable2.len(), 1);
    }
}
