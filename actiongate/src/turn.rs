//! Planning orchestration loop for one user message.
//!
//! ```text
//! triage -> chat reply
//!        -> snapshot -> plan -> compile -> proposal | clarify
//!                                        -> inspection (auto-run) -> snapshot -> ...
//! ```
//!
//! Auto-run inspections are bounded by `planner.max_auto_passes`; a plan turn
//! always ends with at least one proposed item.

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::action::Action;
use crate::core::escalation::{CLARIFY_REPLY, Escalation, escalate};
use crate::core::triage::classify;
use crate::core::types::{ActionDraft, CompileOutcome, Intent, Plan};
use crate::gate::Gate;
use crate::io::oracle::{PlanOracle, PlanRequest};

const CHAT_FALLBACK: &str = "I'm here. Tell me what you'd like to change in the project.";
const ALREADY_DONE: &str = "That already looks the way you asked, so there is nothing to change.";
const INSPECTION_FAILED: &str =
    "I tried to look that up in the project but the lookup failed. Which file should I edit?";
const PROPOSAL_REPLY: &str = "I've queued a change for your approval.";

/// One item handed to the user at the end of a plan turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposedItem {
    Action { action: Action },
    Clarify { reply: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub turn_id: String,
    pub intent: Intent,
    pub reply: String,
    pub proposed: Vec<ProposedItem>,
    /// Inspections that ran automatically during the turn.
    pub inspections: Vec<Action>,
    /// Oracle planning calls made.
    pub passes: u32,
}

/// Run a full turn for a fresh user message.
#[instrument(skip_all, fields(message_len = message.len()))]
pub fn run_turn(
    gate: &Gate,
    oracle: &dyn PlanOracle,
    message: &str,
    last_intent: Option<Intent>,
) -> Result<TurnOutcome> {
    let turn_id = Uuid::new_v4().to_string();
    let intent = match classify(message) {
        Some(intent) => intent,
        None => oracle.triage(&turn_id, message).unwrap_or_else(|err| {
            warn!(err = %err, "triage failed; treating as chat");
            Intent::Chat
        }),
    };
    info!(turn_id = %turn_id, intent = intent.as_str(), "turn triaged");

    match intent {
        Intent::Chat => {
            let reply = oracle.chat(&turn_id, message).unwrap_or_else(|err| {
                warn!(err = %err, "chat failed; using fallback reply");
                CHAT_FALLBACK.to_string()
            });
            Ok(TurnOutcome {
                turn_id,
                intent,
                reply,
                proposed: Vec::new(),
                inspections: Vec::new(),
                passes: 0,
            })
        }
        Intent::Plan => plan_turn(gate, oracle, turn_id, message, last_intent),
    }
}

/// Re-enter the plan path after a human approved a follow-up inspection.
pub fn resume_turn(gate: &Gate, oracle: &dyn PlanOracle, message: &str) -> Result<TurnOutcome> {
    let turn_id = Uuid::new_v4().to_string();
    info!(turn_id = %turn_id, "resuming plan after follow-up inspection");
    plan_turn(gate, oracle, turn_id, message, Some(Intent::Plan))
}

#[instrument(skip_all, fields(turn_id = %turn_id))]
fn plan_turn(
    gate: &Gate,
    oracle: &dyn PlanOracle,
    turn_id: String,
    message: &str,
    last_intent: Option<Intent>,
) -> Result<TurnOutcome> {
    let max_auto_passes = gate.config().planner.max_auto_passes;
    let escalation = gate.config().compiler().escalation;
    let mut proposed = Vec::new();
    let mut inspections = Vec::new();
    let mut reply = String::new();
    let mut passes = 0u32;

    loop {
        let snapshot = gate.snapshot(message, last_intent);
        let plan = oracle
            .plan(&PlanRequest {
                snapshot: &snapshot,
                turn_id: &turn_id,
                pass: passes,
            })
            .unwrap_or_else(|err| {
                warn!(err = %err, pass = passes, "plan failed; continuing with no ops");
                Plan::default()
            });
        passes += 1;
        if !plan.reply.is_empty() {
            reply.clone_from(&plan.reply);
        }

        let compilation = gate.compile(&plan, &snapshot);
        info!(
            pass = passes,
            ops = plan.ops.len(),
            noops = compilation.noops,
            needs_context = compilation.needs_context.len(),
            invalid = compilation.invalid.len(),
            "plan compiled"
        );

        let inspection = match compilation.outcome {
            CompileOutcome::Proposal(draft) => {
                let action = gate.queue(draft)?;
                proposed.push(ProposedItem::Action { action });
                break;
            }
            CompileOutcome::Clarify(text) => {
                proposed.push(ProposedItem::Clarify { reply: text });
                break;
            }
            CompileOutcome::Nothing if compilation.noops > 0 => {
                proposed.push(ProposedItem::Clarify {
                    reply: ALREADY_DONE.to_string(),
                });
                break;
            }
            CompileOutcome::Nothing => match escalate(&snapshot, &plan.ops, &escalation) {
                Escalation::Inspect(draft) => draft,
                Escalation::Clarify(text) => {
                    proposed.push(ProposedItem::Clarify { reply: text });
                    break;
                }
            },
            CompileOutcome::Inspection(draft) => draft,
        };

        if inspections.len() >= max_auto_passes as usize {
            info!(auto_runs = inspections.len(), "auto-run budget spent; asking instead");
            proposed.push(ProposedItem::Clarify {
                reply: CLARIFY_REPLY.to_string(),
            });
            break;
        }
        match auto_run(gate, inspection)? {
            Some(action) => inspections.push(action),
            None => {
                proposed.push(ProposedItem::Clarify {
                    reply: INSPECTION_FAILED.to_string(),
                });
                break;
            }
        }
    }

    if proposed.is_empty() {
        error!(turn_id = %turn_id, "plan turn produced no items; substituting a clarify");
        proposed.push(ProposedItem::Clarify {
            reply: CLARIFY_REPLY.to_string(),
        });
    }
    if reply.is_empty() {
        reply = match &proposed[0] {
            ProposedItem::Action { .. } => PROPOSAL_REPLY.to_string(),
            ProposedItem::Clarify { reply } => reply.clone(),
        };
    }

    Ok(TurnOutcome {
        turn_id,
        intent: Intent::Plan,
        reply,
        proposed,
        inspections,
        passes,
    })
}

/// Queue and run an inspection; `None` when it failed.
fn auto_run(gate: &Gate, draft: ActionDraft) -> Result<Option<Action>> {
    let outcome = gate.run_inspection(draft)?;
    if outcome.result.ok {
        info!(id = %outcome.action.id, "inspection finished");
        Ok(Some(outcome.action))
    } else {
        warn!(
            id = %outcome.action.id,
            error = outcome.result.error.as_deref().unwrap_or_default(),
            "inspection failed"
        );
        Ok(None)
    }
}
