//! Rules & recommendations: computes an
//! ordered sequence of next-action suggestions for a session.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use serde::Serialize;

use crate::domain::CompletionPolicy;
use crate::handlers::{Context, HandlerRegistry};
use crate::state_machine::{passable_transitions, StateMachineSpec};

/// One candidate action surfaced because its guard currently passes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecommendedAction {
    pub id: String,
    pub entity: String,
    pub rationale: String,
    pub blocking: bool,
    pub cmd: Vec<String>,
}

/// A reason no forward-progress recommendation is available for an entity.
#[derive(Debug, Clone, Serialize)]
pub struct Blocker {
    pub entity: String,
    pub id: String,
    pub reason: String,
}

/// A reason the session is not yet complete, with the task ids involved.
#[derive(Debug, Clone, Serialize)]
pub struct IncompleteReason {
    pub code: String,
    pub message: String,
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub policy: CompletionPolicy,
    pub is_complete: bool,
    pub reasons_incomplete: Vec<IncompleteReason>,
}

/// Return shape for the planner's recommendation report.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationReport {
    pub session_id: String,
    pub completion: Completion,
    pub actions: Vec<RecommendedAction>,
    pub blockers: Vec<Blocker>,
    pub rules: Vec<String>,
}

/// One entity snapshot the planner evaluates allowed transitions against.
pub struct EntitySnapshot<'a> {
    pub kind: &'static str,
    pub id: String,
    pub state: String,
    pub spec: &'a StateMachineSpec,
    pub context: Context,
}

fn render_cmd_template(template: &[String], task_id: &str, session_id: &str, round: u32) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{task_id}", task_id)
                .replace("{session_id}", session_id)
                .replace("{round}", &round.to_string())
        })
        .collect()
}

/// Computes the recommendation report for a session. `snapshots` holds one
/// entry per task/QA under the session plus the session itself; `round` is
/// used for `{round}` template substitution and defaults to 0 when not
/// task-scoped.
#[must_use]
pub fn recommend(
    session_id: &str,
    policy: CompletionPolicy,
    is_complete: bool,
    reasons_incomplete: Vec<IncompleteReason>,
    registry: &HandlerRegistry,
    snapshots: &[EntitySnapshot<'_>],
    round: u32,
    limit: usize,
) -> RecommendationReport {
    let mut actions = Vec::new();
    let mut blockers = Vec::new();
    let mut rules = std::collections::BTreeSet::new();

    for snapshot in snapshots {
        let passable = passable_transitions(snapshot.spec, registry, &snapshot.state, &snapshot.context);

        if passable.is_empty() {
            blockers.push(Blocker {
                entity: snapshot.kind.to_string(),
                id: snapshot.id.clone(),
                reason: "no allowed transition currently passes its guard".to_string(),
            });
        }

        for transition in passable {
            rules.extend(transition.rules.iter().cloned());
            for rec in &transition.recommendations {
                actions.push(RecommendedAction {
                    id: rec.id.clone(),
                    entity: rec.entity.clone(),
                    rationale: rec.rationale.clone(),
                    blocking: rec.blocking,
                    cmd: render_cmd_template(&rec.cmd_template, &snapshot.id, session_id, round),
                });
            }
        }
    }

    // Blocking recommendations first; stable within each group since
    // `actions` was built in snapshot order.
    actions.sort_by_key(|a| !a.blocking);
    if limit > 0 {
        actions.truncate(limit);
    }

    RecommendationReport {
        session_id: session_id.to_string(),
        completion: Completion {
            policy,
            is_complete,
            reasons_incomplete,
        },
        actions,
        blockers,
        rules: rules.into_iter().collect(),
    }
}

/// Applies the session completion policy (default:
/// `parent_validated_children_done`) given the root task's validated-ness
/// and whether every child task is in a "done or better" state.
#[must_use]
pub fn is_session_complete(
    policy: CompletionPolicy,
    root_validated: bool,
    all_children_done_or_better: bool,
    all_tasks_validated: bool,
) -> bool {
    match policy {
        CompletionPolicy::ParentValidatedChildrenDone => root_validated && all_children_done_or_better,
        CompletionPolicy::AllTasksValidated => all_tasks_validated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::register_builtins;
    use crate::state_machine::parse_spec;

    const SPEC_YAML: &str = r"
states:
  todo:
    allowed_transitions:
      - to: wip
        guard: can_start_task
        rules: [RULE.GUARDS.FAIL_CLOSED]
        recommendations:
          - id: claim-task
            entity: task
            rationale: ready to start
            blocking: true
            cmd_template: ['task', 'claim', '{task_id}', '--session', '{session_id}']
";

    #[test]
    fn recommends_claim_when_guard_passes() {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry).unwrap();
        let spec = parse_spec(SPEC_YAML).unwrap();

        let mut ctx = Context::new();
        ctx.insert("unmet_dependencies".into(), serde_json::json!([]));

        let snapshots = vec![EntitySnapshot {
            kind: "task",
            id: "T-001".into(),
            state: "todo".into(),
            spec: &spec,
            context: ctx,
        }];

        let report = recommend(
            "S-1",
            CompletionPolicy::ParentValidatedChildrenDone,
            false,
            vec![],
            &registry,
            &snapshots,
            0,
            0,
        );

        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].cmd, vec!["task", "claim", "T-001", "--session", "S-1"]);
        assert!(report.rules.contains(&"RULE.GUARDS.FAIL_CLOSED".to_string()));
        assert!(report.blockers.is_empty());
    }

    #[test]
    fn blocked_guard_produces_a_blocker_not_an_action() {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry).unwrap();
        let spec = parse_spec(SPEC_YAML).unwrap();

        let mut ctx = Context::new();
        ctx.insert("unmet_dependencies".into(), serde_json::json!(["T-000"]));

        let snapshots = vec![EntitySnapshot {
            kind: "task",
            id: "T-001".into(),
            state: "todo".into(),
            spec: &spec,
            context: ctx,
        }];

        let report = recommend(
            "S-1",
            CompletionPolicy::ParentValidatedChildrenDone,
            false,
            vec![],
            &registry,
            &snapshots,
            0,
            0,
        );

        assert!(report.actions.is_empty());
        assert_eq!(report.blockers.len(), 1);
    }

    #[test]
    fn completion_policy_parent_validated_requires_validated_root() {
        assert!(!is_session_complete(
            CompletionPolicy::ParentValidatedChildrenDone,
            false,
            true,
            true
        ));
        assert!(is_session_complete(
            CompletionPolicy::ParentValidatedChildrenDone,
            true,
            true,
            false
        ));
    }
}
