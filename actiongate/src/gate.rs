//! Orchestration for the human-facing gate operations.
//!
//! A [`Gate`] owns the queue, the executor and the loaded config for one
//! project root. Approval, rejection and rollback are status transitions on
//! the store; the executor only ever runs an action after its `pending ->
//! running` claim succeeded, so the stored status is the durable idempotency
//! record.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{
    Action, ActionKind, ActionMeta, ActionOutput, ActionStatus, ExecResult, FileMutation,
};
use crate::core::compiler::compile_plan;
use crate::core::lifecycle::{can_transition, status_after_run};
use crate::core::preview::{PreviewFile, preview_kind};
use crate::core::types::{ActionDraft, Compilation, Intent, Plan, Snapshot};
use crate::error::GateError;
use crate::io::backup::BackupStore;
use crate::io::config::{GateConfig, load_config};
use crate::io::executor::{ActionExecutor, ExecOptions};
use crate::io::init::{GatePaths, ensure_layout};
use crate::io::search::WalkSearch;
use crate::io::snapshot::SnapshotBuilder;
use crate::io::store::{ActionPatch, ActionStore, Claim};
use crate::io::workspace::Workspace;

/// Fields of `POST action/add` and `actiongate add`.
#[derive(Debug, Clone, Default)]
pub struct NewAction {
    pub kind_type: String,
    pub payload: Value,
    pub title: String,
    pub reason: String,
    pub meta: ActionMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveOutcome {
    pub action: Action,
    pub result: ExecResult,
    /// The action was not pending, so nothing ran.
    pub skipped: bool,
    pub restart_requested: bool,
    pub off_requested: bool,
    /// Plain-language failure text; `result.error` keeps the technical detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Original message of a completed follow-up inspection; the caller
    /// resumes planning with it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followup_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub action: Action,
    pub restored: Vec<String>,
    pub removed: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub action_id: String,
    pub files: Vec<PreviewFile>,
}

pub struct Gate {
    paths: GatePaths,
    config: GateConfig,
    store: ActionStore,
    executor: ActionExecutor,
}

impl Gate {
    /// Open the gate for `root`, creating missing `.actiongate/` layout.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn open(root: &Path) -> Result<Self> {
        let paths = ensure_layout(root).context("prepare .actiongate layout")?;
        let config = load_config(&paths.config_path)?;
        let workspace = Workspace::new(root)?;
        let backups = BackupStore::new(&paths.backups_dir, config.executor.backup_retention);
        let search = WalkSearch::new(
            workspace.root(),
            config.search.max_file_bytes,
            config.search.exclude_dirs.clone(),
        );
        let store = ActionStore::new(&paths.actions_path, config.store.max_actions);
        let executor =
            ActionExecutor::new(workspace, backups, Box::new(search), config.executor.clone());
        debug!(actions = %paths.actions_path.display(), "gate opened");
        Ok(Self {
            paths,
            config,
            store,
            executor,
        })
    }

    pub fn paths(&self) -> &GatePaths {
        &self.paths
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn list(&self) -> Vec<Action> {
        self.store.list()
    }

    /// Queue a manually submitted action as `pending`.
    pub fn add(&self, new: NewAction) -> Result<Action> {
        let kind = ActionKind::from_json(serde_json::json!({
            "type": new.kind_type,
            "payload": new.payload,
        }))
        .map_err(|err| GateError::InvalidAction(err.to_string()))?;
        let action = Action::new(kind, new.title, new.reason).with_meta(new.meta);
        info!(id = %action.id, kind = action.kind.type_name(), "action queued");
        self.store.add(action)
    }

    /// Queue a compiled draft as `pending`.
    pub fn queue(&self, draft: ActionDraft) -> Result<Action> {
        let action = Action::new(draft.kind, draft.title, draft.reason).with_meta(draft.meta);
        info!(id = %action.id, kind = action.kind.type_name(), "draft queued");
        self.store.add(action)
    }

    /// Approve and run a pending action.
    ///
    /// Approving anything that is not `pending` is an idempotent skip. A dry
    /// run leaves the status untouched.
    #[instrument(skip_all, fields(id = %id, dry_run = dry_run))]
    pub fn approve(&self, id: &str, dry_run: bool) -> Result<ApproveOutcome> {
        if dry_run {
            let action = self
                .store
                .get_by_id(id)
                .ok_or_else(|| GateError::NotFound(id.to_string()))?;
            let result = self.executor.execute(&action, ExecOptions { dry_run: true });
            return Ok(ApproveOutcome {
                action,
                message: result.user_message().map(str::to_string),
                result,
                skipped: false,
                restart_requested: false,
                off_requested: false,
                followup_message: None,
            });
        }

        let action = match self
            .store
            .claim(id, ActionStatus::Pending, ActionStatus::Running)?
        {
            Claim::Claimed(action) => action,
            Claim::Unexpected(action) => {
                info!(status = %action.status, "approval of non-pending action skipped");
                let result = ExecResult::skipped(format!("action is already {}", action.status));
                return Ok(ApproveOutcome {
                    action,
                    result,
                    skipped: true,
                    restart_requested: false,
                    off_requested: false,
                    message: None,
                    followup_message: None,
                });
            }
            Claim::Missing => return Err(GateError::NotFound(id.to_string()).into()),
        };

        self.run_claimed(action)
    }

    fn run_claimed(&self, action: Action) -> Result<ApproveOutcome> {
        let result = self.executor.execute(&action, ExecOptions::default());
        let status = status_after_run(result.ok);
        let updated = match self
            .store
            .update(&action.id, ActionPatch::status(status).with_result(result.clone()))
        {
            Ok(updated) => updated.ok_or_else(|| GateError::NotFound(action.id.clone()))?,
            Err(err) => return Err(self.record_lost(&action.id, result, err)),
        };
        info!(id = %updated.id, status = %status, "action finished");

        let followup_message = (result.ok && updated.is_followup())
            .then(|| updated.meta.original_message.clone())
            .flatten();
        Ok(ApproveOutcome {
            restart_requested: result.restart_requested,
            off_requested: result.off_requested,
            action: updated,
            message: result.user_message().map(str::to_string),
            result,
            skipped: false,
            followup_message,
        })
    }

    /// The action ran but its result could not be stored. Mark it `failed` so
    /// it is not stuck `running`; rollback stays possible either way.
    fn record_lost(&self, id: &str, result: ExecResult, err: anyhow::Error) -> anyhow::Error {
        error!(id = %id, err = %format!("{err:#}"), "could not record execution result");
        match self
            .store
            .update(id, ActionPatch::status(ActionStatus::Failed).with_result(result))
        {
            Ok(_) => warn!(id = %id, "action marked failed after its result write failed"),
            Err(retry) => error!(
                id = %id,
                err = %format!("{retry:#}"),
                "action left running; fix .actiongate/state/actions.json by hand"
            ),
        }
        err.context(format!("record result of action {id}"))
    }

    /// Reject a pending action, recording an optional reviewer note.
    #[instrument(skip_all, fields(id = %id))]
    pub fn reject(&self, id: &str, note: Option<String>) -> Result<Action> {
        match self
            .store
            .claim(id, ActionStatus::Pending, ActionStatus::Rejected)?
        {
            Claim::Claimed(action) => {
                let note = note.filter(|note| !note.trim().is_empty());
                if note.is_none() {
                    return Ok(action);
                }
                let updated = self
                    .store
                    .update(id, ActionPatch::default().with_note(note))?
                    .ok_or_else(|| GateError::NotFound(id.to_string()))?;
                Ok(updated)
            }
            Claim::Unexpected(action) => Err(GateError::InvalidTransition {
                id: id.to_string(),
                status: action.status,
                operation: "reject",
            }
            .into()),
            Claim::Missing => Err(GateError::NotFound(id.to_string()).into()),
        }
    }

    /// Undo the file mutations of an executed action, newest first.
    ///
    /// Failed actions qualify too: a bundle that stopped part-way keeps the
    /// mutations of the steps that ran.
    #[instrument(skip_all, fields(id = %id, dry_run = dry_run))]
    pub fn rollback(&self, id: &str, dry_run: bool) -> Result<RollbackOutcome> {
        let action = self
            .store
            .get_by_id(id)
            .ok_or_else(|| GateError::NotFound(id.to_string()))?;
        if !can_transition(action.status, ActionStatus::RolledBack) {
            return Err(GateError::InvalidTransition {
                id: id.to_string(),
                status: action.status,
                operation: "roll back",
            }
            .into());
        }

        let mut mutations = Vec::new();
        if let Some(output) = action.result.as_ref().and_then(|r| r.result.as_ref()) {
            collect_mutations(output, &mut mutations);
        }
        if mutations.is_empty() {
            return Err(GateError::NothingToRollBack(id.to_string()).into());
        }

        let mut restored = Vec::new();
        let mut removed = Vec::new();
        for mutation in mutations.iter().rev() {
            if let Some(backup) = &mutation.backup {
                if !dry_run {
                    self.executor
                        .restore_backup(backup, &mutation.path)
                        .with_context(|| format!("restore {}", mutation.path))?;
                }
                restored.push(mutation.path.clone());
            } else if mutation.created {
                if !dry_run {
                    self.executor
                        .remove_created(&mutation.path)
                        .with_context(|| format!("remove {}", mutation.path))?;
                }
                removed.push(mutation.path.clone());
            }
        }

        let action = if dry_run {
            action
        } else {
            info!(restored = restored.len(), removed = removed.len(), "action rolled back");
            self.store
                .update(id, ActionPatch::status(ActionStatus::RolledBack))?
                .ok_or_else(|| GateError::NotFound(id.to_string()))?
        };
        Ok(RollbackOutcome {
            action,
            restored,
            removed,
            dry_run,
        })
    }

    /// Diff preview of what the action would do against current disk.
    pub fn preview(&self, id: &str) -> Result<Preview> {
        let action = self
            .store
            .get_by_id(id)
            .ok_or_else(|| GateError::NotFound(id.to_string()))?;
        let files = if action.kind.is_previewable() {
            preview_kind(&action.kind, self.executor.workspace())
        } else {
            Vec::new()
        };
        Ok(Preview {
            action_id: action.id,
            files,
        })
    }

    /// Fresh grounding snapshot for `message`.
    pub fn snapshot(&self, message: &str, last_intent: Option<Intent>) -> Snapshot {
        let actions = self.store.list();
        SnapshotBuilder::new(self.executor.workspace(), &self.config.grounding)
            .build(message, last_intent, &actions)
    }

    pub fn compile(&self, plan: &Plan, snapshot: &Snapshot) -> Compilation {
        compile_plan(
            plan,
            snapshot,
            self.executor.workspace(),
            &self.config.compiler(),
        )
    }

    /// Queue a read-only inspection and run it without approval.
    pub fn run_inspection(&self, draft: ActionDraft) -> Result<ApproveOutcome> {
        if !draft.is_inspection() {
            warn!(kind = draft.kind.type_name(), "refusing to auto-run a non-inspection draft");
            return Err(GateError::InvalidAction(format!(
                "{} requires approval",
                draft.kind.type_name()
            ))
            .into());
        }
        let queued = self.queue(draft)?;
        match self
            .store
            .claim(&queued.id, ActionStatus::Pending, ActionStatus::Running)?
        {
            Claim::Claimed(action) => self.run_claimed(action),
            Claim::Unexpected(action) => Err(GateError::InvalidTransition {
                id: action.id,
                status: action.status,
                operation: "run",
            }
            .into()),
            Claim::Missing => Err(GateError::NotFound(queued.id).into()),
        }
    }
}

/// File mutations recorded in an output, bundle steps in execution order.
fn collect_mutations(output: &ActionOutput, out: &mut Vec<FileMutation>) {
    match output {
        ActionOutput::File(mutation) => out.push(mutation.clone()),
        ActionOutput::Bundle(report) => {
            for step in &report.steps {
                if step.ok
                    && let Some(inner) = &step.result
                {
                    collect_mutations(inner, out);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use serde_json::json;

    fn gate() -> (tempfile::TempDir, Gate) {
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = Gate::open(temp.path()).expect("open gate");
        (temp, gate)
    }

    fn add(gate: &Gate, kind_type: &str, payload: Value) -> Action {
        gate.add(NewAction {
            kind_type: kind_type.to_string(),
            payload,
            title: "t".to_string(),
            ..NewAction::default()
        })
        .expect("add")
    }

    #[test]
    fn add_rejects_unknown_kinds() {
        let (_temp, gate) = gate();
        let err = gate
            .add(NewAction {
                kind_type: "format_disk".to_string(),
                ..NewAction::default()
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::InvalidAction(_))
        ));
    }

    /// Verifies a second approval is a skip and the side effect happens once.
    #[test]
    fn approve_runs_once() {
        let (temp, gate) = gate();
        let action = add(&gate, "write_file", json!({"path": "a.txt", "content": "x"}));

        let first = gate.approve(&action.id, false).expect("approve");
        assert!(first.result.ok);
        assert_eq!(first.action.status, ActionStatus::Done);
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "x");

        fs::remove_file(temp.path().join("a.txt")).expect("remove");
        let second = gate.approve(&action.id, false).expect("approve again");
        assert!(second.skipped);
        assert!(second.result.skipped);
        assert!(!temp.path().join("a.txt").exists());
    }

    #[test]
    fn approve_unknown_id_is_not_found() {
        let (_temp, gate) = gate();
        let err = gate.approve("nope", false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::NotFound(_))
        ));
    }

    #[test]
    fn dry_run_approval_keeps_the_action_pending() {
        let (temp, gate) = gate();
        let action = add(&gate, "mkdir", json!({"path": "new"}));
        let outcome = gate.approve(&action.id, true).expect("dry run");
        assert!(outcome.result.ok);
        assert!(!temp.path().join("new").exists());
        assert_eq!(
            gate.store().get_by_id(&action.id).expect("stored").status,
            ActionStatus::Pending
        );
    }

    #[test]
    fn reject_records_note_and_refuses_twice() {
        let (_temp, gate) = gate();
        let action = add(&gate, "restart", json!({}));
        let rejected = gate
            .reject(&action.id, Some("not now".to_string()))
            .expect("reject");
        assert_eq!(rejected.status, ActionStatus::Rejected);
        assert_eq!(rejected.note.as_deref(), Some("not now"));

        let err = gate.reject(&action.id, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::InvalidTransition { .. })
        ));
        assert!(gate.approve(&action.id, false).expect("approve").skipped);
    }

    #[test]
    fn rollback_restores_overwritten_file() {
        let (temp, gate) = gate();
        fs::write(temp.path().join("a.txt"), "before").expect("write");
        let action = add(&gate, "write_file", json!({"path": "a.txt", "content": "after"}));
        gate.approve(&action.id, false).expect("approve");

        let preview = gate.rollback(&action.id, true).expect("dry rollback");
        assert_eq!(preview.restored, vec!["a.txt"]);
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "after");

        let outcome = gate.rollback(&action.id, false).expect("rollback");
        assert_eq!(outcome.action.status, ActionStatus::RolledBack);
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "before");

        assert!(gate.rollback(&action.id, false).is_err());
    }

    #[test]
    fn rollback_without_file_changes_is_refused() {
        let (_temp, gate) = gate();
        let action = add(&gate, "mkdir", json!({"path": "d"}));
        gate.approve(&action.id, false).expect("approve");
        let err = gate.rollback(&action.id, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::NothingToRollBack(_))
        ));
    }

    #[test]
    fn preview_of_signal_has_no_files() {
        let (_temp, gate) = gate();
        let action = add(&gate, "off", json!({}));
        let preview = gate.preview(&action.id).expect("preview");
        assert_eq!(preview.action_id, action.id);
        assert!(preview.files.is_empty());
    }
}
