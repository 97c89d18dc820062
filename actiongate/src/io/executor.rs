//! Action executor: one side effect per [`ActionKind`], with backups first.
//!
//! [`ActionExecutor::execute`] never returns an error; every failure is folded
//! into an [`ExecResult`] carrying its [`ErrorKind`](crate::error::ErrorKind).

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::action::{
    Action, ActionKind, ActionOutput, ApplyPatchPayload, BundlePayload, BundleReport,
    CommandReport, DirectoryReport, ExecResult, FileMutation, LaunchAppPayload, LaunchReport,
    PathPayload, ReadSnippetPayload, RunCmdPayload, SetHtmlTitlePayload, SignalReport,
    SnippetReport, WriteFilePayload,
};
use crate::core::html::{TitleError, replace_title};
use crate::core::patch::apply_strict;
use crate::core::path::GATE_DIR;
use crate::error::ActionError;
use crate::io::backup::BackupStore;
use crate::io::config::{ExecutorConfig, IdenticalWrite};
use crate::io::process::{run_command_with_timeout, spawn_detached};
use crate::io::search::{RepoSearch, vimgrep_output};
use crate::io::workspace::Workspace;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Describe the effect without mutating anything.
    pub dry_run: bool,
}

/// Idempotency guard: ids currently executing plus a bounded FIFO of ids
/// that already ran in this process.
pub struct ExecutionGuard {
    state: Mutex<GuardState>,
}

struct GuardState {
    executing: HashSet<String>,
    executed: VecDeque<String>,
    executed_ids: HashSet<String>,
    capacity: usize,
}

/// Outcome of asking the guard to run an id.
pub enum Admission<'a> {
    Admitted(ExecutionTicket<'a>),
    InFlight,
    AlreadyExecuted,
}

/// Held for the duration of one execution; dropping it releases the id.
pub struct ExecutionTicket<'a> {
    guard: &'a ExecutionGuard,
    id: String,
}

impl ExecutionGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(GuardState {
                executing: HashSet::new(),
                executed: VecDeque::new(),
                executed_ids: HashSet::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn admit(&self, id: &str) -> Admission<'_> {
        let mut state = self.lock();
        if state.executed_ids.contains(id) {
            return Admission::AlreadyExecuted;
        }
        if !state.executing.insert(id.to_string()) {
            return Admission::InFlight;
        }
        Admission::Admitted(ExecutionTicket {
            guard: self,
            id: id.to_string(),
        })
    }

    pub fn was_executed(&self, id: &str) -> bool {
        self.lock().executed_ids.contains(id)
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExecutionTicket<'_> {
    /// Record the id as executed; later admissions are refused.
    pub fn complete(self) {
        let mut state = self.guard.lock();
        if state.executed_ids.insert(self.id.clone()) {
            state.executed.push_back(self.id.clone());
        }
        while state.executed.len() > state.capacity {
            if let Some(evicted) = state.executed.pop_front() {
                state.executed_ids.remove(&evicted);
            }
        }
    }
}

impl Drop for ExecutionTicket<'_> {
    fn drop(&mut self) {
        self.guard.lock().executing.remove(&self.id);
    }
}

pub struct ActionExecutor {
    workspace: Workspace,
    backups: BackupStore,
    search: Box<dyn RepoSearch + Send + Sync>,
    config: ExecutorConfig,
    guard: ExecutionGuard,
}

impl ActionExecutor {
    pub fn new(
        workspace: Workspace,
        backups: BackupStore,
        search: Box<dyn RepoSearch + Send + Sync>,
        config: ExecutorConfig,
    ) -> Self {
        let guard = ExecutionGuard::new(config.executed_cache);
        Self {
            workspace,
            backups,
            search,
            config,
            guard,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Run `action` once. Duplicate or concurrent calls for the same id are
    /// reported as skipped.
    #[instrument(skip_all, fields(id = %action.id, kind = action.kind.type_name(), dry_run = options.dry_run))]
    pub fn execute(&self, action: &Action, options: ExecOptions) -> ExecResult {
        if options.dry_run {
            return self.run_step(&action.id, &action.kind, true);
        }

        let ticket = match self.guard.admit(&action.id) {
            Admission::Admitted(ticket) => ticket,
            Admission::InFlight => {
                info!("action already executing; skipping");
                return ExecResult::skipped("action is already executing");
            }
            Admission::AlreadyExecuted => {
                info!("action already executed; skipping");
                return ExecResult::skipped("action was already executed");
            }
        };

        let result = self.run_step(&action.id, &action.kind, false);
        ticket.complete();

        if let Err(err) = self.backups.prune() {
            warn!(err = %format!("{err:#}"), "backup pruning failed");
        }
        if result.ok {
            debug!(skipped = result.skipped, "action finished");
        } else {
            warn!(error = result.error.as_deref().unwrap_or_default(), "action failed");
        }
        result
    }

    /// Restore `backup` (as stored in a file mutation report) over `target`.
    pub fn restore_backup(&self, backup: &str, target: &str) -> Result<(), ActionError> {
        let target = self.workspace.resolve(target)?;
        let backup = self.backup_path(backup)?;
        self.backups.restore(&backup, &target)
    }

    /// Delete a file the action created; already-missing files are fine.
    pub fn remove_created(&self, target: &str) -> Result<(), ActionError> {
        let target = self.workspace.resolve(target)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ActionError::io(format!("remove {}", target.display()), err)),
        }
    }

    fn backup_path(&self, stored: &str) -> Result<PathBuf, ActionError> {
        let name = Path::new(stored)
            .file_name()
            .ok_or_else(|| ActionError::Backup(format!("invalid backup reference {stored:?}")))?;
        Ok(self.backups.dir().join(name))
    }

    fn run_step(&self, id: &str, kind: &ActionKind, dry_run: bool) -> ExecResult {
        let outcome = match kind {
            ActionKind::RunCmd(payload) => self.run_cmd(payload, dry_run),
            ActionKind::WriteFile(payload) => self.write_file(id, payload, dry_run),
            ActionKind::ApplyPatch(payload) => self.apply_patch(id, payload, dry_run),
            ActionKind::Mkdir(payload) => self.mkdir(payload, dry_run),
            ActionKind::Bundle(payload) => Ok(self.bundle(id, payload, dry_run)),
            ActionKind::Restart(_) => Ok(signal("restart", dry_run)),
            ActionKind::Off(_) => Ok(signal("off", dry_run)),
            ActionKind::ReadSnippet(payload) => self.read_snippet(payload),
            ActionKind::SetHtmlTitle(payload) => self.set_html_title(id, payload, dry_run),
            ActionKind::LaunchApp(payload) => self.launch_app(payload, dry_run),
            ActionKind::OpenPath(payload) => self.open_path(payload, dry_run),
        };
        outcome.unwrap_or_else(|err| ExecResult::failure(&err))
    }

    fn run_cmd(&self, payload: &RunCmdPayload, dry_run: bool) -> Result<ExecResult, ActionError> {
        if let Some(spec) = &payload.search {
            // Searches are read-only, so a dry run performs them too.
            let matches = self
                .search
                .search(spec)
                .map_err(|err| ActionError::Command(format!("{err:#}")))?;
            let exit_code = if matches.is_empty() { 1 } else { 0 };
            return Ok(ExecResult::success(ActionOutput::Command(CommandReport {
                cmd: payload.cmd.clone(),
                exit_code: Some(exit_code),
                stdout: vimgrep_output(&matches),
                stderr: String::new(),
                timed_out: false,
                truncated_bytes: 0,
            })));
        }

        let cmd = payload.cmd.trim();
        if cmd.is_empty() {
            return Err(ActionError::missing("cmd"));
        }
        let cwd = match payload.cwd.as_deref() {
            Some(raw) => self.workspace.resolve(raw)?,
            None => self.workspace.root().to_path_buf(),
        };
        if !cwd.is_dir() {
            return Err(ActionError::Validation(format!(
                "working directory {} does not exist",
                self.workspace.relative(&cwd)
            )));
        }
        if dry_run {
            return Ok(dry(format!("would run `{cmd}`")));
        }

        let (program, prefix) = self
            .config
            .shell
            .split_first()
            .ok_or_else(|| ActionError::Validation("executor shell is empty".to_string()))?;
        let mut command = Command::new(program);
        command.args(prefix).arg(cmd).current_dir(&cwd);
        let timeout = payload
            .timeout_secs
            .filter(|secs| *secs > 0)
            .map_or_else(|| self.config.command_timeout(), Duration::from_secs);

        let output = run_command_with_timeout(command, None, timeout, self.config.output_limit_bytes)
            .map_err(|err| ActionError::Command(format!("{err:#}")))?;
        let report = ActionOutput::Command(CommandReport {
            cmd: cmd.to_string(),
            exit_code: output.status.code(),
            stdout: output.stdout.lossy(),
            stderr: output.stderr.lossy(),
            timed_out: output.timed_out,
            truncated_bytes: output.dropped_bytes(),
        });

        if output.timed_out {
            let err = ActionError::Command(format!("timed out after {}s", timeout.as_secs()));
            return Ok(ExecResult::failure(&err).with_output(report));
        }
        if !output.status.success() {
            let err = ActionError::Command(format!(
                "exited with status {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string())
            ));
            return Ok(ExecResult::failure(&err).with_output(report));
        }
        Ok(ExecResult::success(report))
    }

    fn write_file(
        &self,
        id: &str,
        payload: &WriteFilePayload,
        dry_run: bool,
    ) -> Result<ExecResult, ActionError> {
        let target = self.workspace.resolve(&payload.path)?;
        let rel = self.workspace.relative(&target);
        if target.is_dir() {
            return Err(ActionError::Validation(format!("{rel} is a directory")));
        }
        let existed = target.is_file();
        if existed {
            let current = fs::read(&target)
                .map_err(|err| ActionError::io(format!("read {rel}"), err))?;
            if current == payload.content.as_bytes() {
                return match self.config.identical_write {
                    IdenticalWrite::Reject => Err(ActionError::PatchMismatch(format!(
                        "{rel} already has exactly this content"
                    ))),
                    IdenticalWrite::Skip => {
                        Ok(ExecResult::skipped(format!("{rel} already up to date")))
                    }
                };
            }
        }
        if dry_run {
            let verb = if existed { "overwrite" } else { "create" };
            return Ok(dry(format!("would {verb} {rel}")));
        }

        let backup = if existed {
            Some(self.backups.create(id, &target)?)
        } else {
            None
        };
        if let Err(err) = write_atomic(&target, payload.content.as_bytes()) {
            if let Some(backup) = &backup {
                self.backups.discard(backup);
            }
            return Err(err);
        }
        Ok(ExecResult::success(ActionOutput::File(FileMutation {
            path: rel,
            backup: backup.as_deref().map(backup_reference),
            created: !existed,
            bytes: payload.content.len(),
        })))
    }

    fn apply_patch(
        &self,
        id: &str,
        payload: &ApplyPatchPayload,
        dry_run: bool,
    ) -> Result<ExecResult, ActionError> {
        let target = self.workspace.resolve(&payload.path)?;
        let rel = self.workspace.relative(&target);
        if !target.is_file() {
            return Err(ActionError::Validation(format!("{rel} does not exist")));
        }
        let original = fs::read_to_string(&target)
            .map_err(|err| ActionError::io(format!("read {rel}"), err))?;

        if dry_run {
            apply_strict(&original, &payload.edits)?;
            return Ok(dry(format!(
                "would apply {} edit(s) to {rel}",
                payload.edits.len()
            )));
        }

        let backup = self.backups.create(id, &target)?;
        let patched = match apply_strict(&original, &payload.edits) {
            Ok(patched) => patched,
            Err(err) => {
                // Nothing was written; the fresh backup is identical to the target.
                self.backups.discard(&backup);
                return Err(err);
            }
        };
        if let Err(err) = write_atomic(&target, patched.as_bytes()) {
            if let Err(restore_err) = self.backups.restore(&backup, &target) {
                warn!(err = %restore_err, "restore after failed patch write failed");
            }
            self.backups.discard(&backup);
            return Err(err);
        }
        Ok(ExecResult::success(ActionOutput::File(FileMutation {
            path: rel,
            backup: Some(backup_reference(&backup)),
            created: false,
            bytes: patched.len(),
        })))
    }

    fn mkdir(&self, payload: &PathPayload, dry_run: bool) -> Result<ExecResult, ActionError> {
        let target = self.workspace.resolve(&payload.path)?;
        let rel = self.workspace.relative(&target);
        if target.is_dir() {
            return Ok(ExecResult::success(ActionOutput::Directory(DirectoryReport {
                directory: rel,
                created: false,
            })));
        }
        if target.exists() {
            return Err(ActionError::Validation(format!(
                "{rel} exists and is not a directory"
            )));
        }
        if dry_run {
            return Ok(dry(format!("would create folder {rel}")));
        }
        fs::create_dir_all(&target).map_err(|err| ActionError::io(format!("create {rel}"), err))?;
        Ok(ExecResult::success(ActionOutput::Directory(DirectoryReport {
            directory: rel,
            created: true,
        })))
    }

    fn bundle(&self, id: &str, payload: &BundlePayload, dry_run: bool) -> ExecResult {
        if payload.steps.is_empty() {
            return ExecResult::failure(&ActionError::missing("steps"));
        }
        let mut steps = Vec::with_capacity(payload.steps.len());
        let mut restart_requested = false;
        let mut off_requested = false;

        for (index, step) in payload.steps.iter().enumerate() {
            let result = self.run_step(id, step, dry_run);
            restart_requested |= result.restart_requested;
            off_requested |= result.off_requested;
            let failed = !result.ok;
            let message = result.error.clone();
            steps.push(result);
            if failed {
                warn!(index, kind = step.type_name(), "bundle step failed; aborting");
                let err = ActionError::BundleStep {
                    index,
                    message: message.unwrap_or_else(|| "step failed".to_string()),
                };
                let mut result = ExecResult::failure(&err)
                    .with_output(ActionOutput::Bundle(BundleReport { steps }));
                result.restart_requested = restart_requested;
                result.off_requested = off_requested;
                return result;
            }
        }

        let mut result = ExecResult::success(ActionOutput::Bundle(BundleReport { steps }));
        result.restart_requested = restart_requested;
        result.off_requested = off_requested;
        result
    }

    fn read_snippet(&self, payload: &ReadSnippetPayload) -> Result<ExecResult, ActionError> {
        let target = self.workspace.resolve(&payload.path)?;
        let rel = self.workspace.relative(&target);
        if !target.is_file() {
            return Err(ActionError::Validation(format!("{rel} does not exist")));
        }
        let bytes = fs::read(&target).map_err(|err| ActionError::io(format!("read {rel}"), err))?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().collect();

        let start_line = payload.start_line.max(1);
        if start_line > lines.len().max(1) {
            return Err(ActionError::Validation(format!(
                "{rel} has {} lines; cannot start at line {start_line}",
                lines.len()
            )));
        }
        let end_line = payload
            .end_line
            .unwrap_or(lines.len())
            .clamp(start_line, lines.len().max(start_line));
        let window = lines
            .get(start_line - 1..end_line.min(lines.len()))
            .unwrap_or_default()
            .join("\n");

        Ok(ExecResult::success(ActionOutput::Snippet(SnippetReport {
            path: rel,
            start_line,
            end_line,
            text: truncate_chars(window, self.config.snippet_max_bytes),
        })))
    }

    fn set_html_title(
        &self,
        id: &str,
        payload: &SetHtmlTitlePayload,
        dry_run: bool,
    ) -> Result<ExecResult, ActionError> {
        let target = self.workspace.resolve(&payload.path)?;
        let rel = self.workspace.relative(&target);
        if !target.is_file() {
            return Err(ActionError::Validation(format!("{rel} does not exist")));
        }
        let original = fs::read_to_string(&target)
            .map_err(|err| ActionError::io(format!("read {rel}"), err))?;
        let updated = replace_title(&original, &payload.title).map_err(|err| match err {
            TitleError::Missing => ActionError::PatchMismatch(format!("{rel} has no <title>")),
            TitleError::Unchanged => {
                ActionError::PatchMismatch(format!("{rel} already has that title"))
            }
        })?;
        if dry_run {
            return Ok(dry(format!("would retitle {rel}")));
        }

        let backup = self.backups.create(id, &target)?;
        if let Err(err) = write_atomic(&target, updated.as_bytes()) {
            self.backups.discard(&backup);
            return Err(err);
        }
        Ok(ExecResult::success(ActionOutput::File(FileMutation {
            path: rel,
            backup: Some(backup_reference(&backup)),
            created: false,
            bytes: updated.len(),
        })))
    }

    fn launch_app(
        &self,
        payload: &LaunchAppPayload,
        dry_run: bool,
    ) -> Result<ExecResult, ActionError> {
        let app = payload.app.trim();
        if app.is_empty() {
            return Err(ActionError::missing("app"));
        }
        if dry_run {
            return Ok(dry(format!("would launch {app}")));
        }
        let mut command = Command::new(app);
        command.args(&payload.args).current_dir(self.workspace.root());
        let pid = spawn_detached(command).map_err(|err| ActionError::Command(format!("{err:#}")))?;
        Ok(ExecResult::success(ActionOutput::Launch(LaunchReport {
            launched: app.to_string(),
            pid,
        })))
    }

    fn open_path(&self, payload: &PathPayload, dry_run: bool) -> Result<ExecResult, ActionError> {
        let target = self.workspace.resolve(&payload.path)?;
        let rel = self.workspace.relative(&target);
        if !target.exists() {
            return Err(ActionError::Validation(format!("{rel} does not exist")));
        }
        if dry_run {
            return Ok(dry(format!("would open {rel}")));
        }
        let mut command = Command::new(self.config.opener());
        command.arg(&target).current_dir(self.workspace.root());
        let pid = spawn_detached(command).map_err(|err| ActionError::Command(format!("{err:#}")))?;
        Ok(ExecResult::success(ActionOutput::Launch(LaunchReport {
            launched: rel,
            pid,
        })))
    }
}

fn signal(name: &str, dry_run: bool) -> ExecResult {
    if dry_run {
        return dry(format!("would request {name}"));
    }
    let mut result = ExecResult::success(ActionOutput::Signal(SignalReport {
        signal: name.to_string(),
    }));
    result.restart_requested = name == "restart";
    result.off_requested = name == "off";
    result
}

fn dry(description: String) -> ExecResult {
    ExecResult {
        ok: true,
        reason: Some(format!("dry run: {description}")),
        ..ExecResult::default()
    }
}

fn backup_reference(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{GATE_DIR}/backups/{name}")
}

fn truncate_chars(mut text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

/// Write via a sibling temp file and rename, creating parents first.
fn write_atomic(target: &Path, contents: &[u8]) -> Result<(), ActionError> {
    let parent = target
        .parent()
        .ok_or_else(|| ActionError::Validation(format!("{} has no parent", target.display())))?;
    fs::create_dir_all(parent)
        .map_err(|err| ActionError::io(format!("create {}", parent.display()), err))?;
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{name}.actiongate.tmp"));
    fs::write(&tmp_path, contents)
        .map_err(|err| ActionError::io(format!("write {}", tmp_path.display()), err))?;
    fs::rename(&tmp_path, target).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        ActionError::io(format!("replace {}", target.display()), err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{PatchEdit, SearchSpec, SignalPayload};
    use crate::error::ErrorKind;
    use crate::io::search::WalkSearch;

    struct Fixture {
        temp: tempfile::TempDir,
        executor: ActionExecutor,
    }

    impl Fixture {
        fn new(config: ExecutorConfig) -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let workspace = Workspace::new(temp.path()).expect("workspace");
            let backups = BackupStore::new(workspace.root().join(".actiongate/backups"), 50);
            let search = WalkSearch::new(
                workspace.root(),
                1024 * 1024,
                vec![".actiongate".to_string()],
            );
            let executor = ActionExecutor::new(workspace, backups, Box::new(search), config);
            Self { temp, executor }
        }

        fn write(&self, rel: &str, text: &str) {
            let path = self.temp.path().join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, text).expect("write");
        }

        fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.temp.path().join(rel)).expect("read")
        }

        fn run(&self, kind: ActionKind) -> ExecResult {
            self.executor
                .execute(&Action::new(kind, "t", ""), ExecOptions::default())
        }

        fn backup_count(&self) -> usize {
            fs::read_dir(self.temp.path().join(".actiongate/backups"))
                .map(|dir| dir.count())
                .unwrap_or(0)
        }
    }

    fn write_file(path: &str, content: &str) -> ActionKind {
        ActionKind::WriteFile(WriteFilePayload {
            path: path.to_string(),
            content: content.to_string(),
        })
    }

    fn patch(path: &str, find: &str, replace: &str) -> ActionKind {
        ActionKind::ApplyPatch(ApplyPatchPayload {
            path: path.to_string(),
            edits: vec![PatchEdit::once(find, replace)],
        })
    }

    fn shell(cmd: &str) -> ActionKind {
        ActionKind::RunCmd(RunCmdPayload {
            cmd: cmd.to_string(),
            cwd: None,
            timeout_secs: None,
            search: None,
        })
    }

    fn file_output(result: &ExecResult) -> &FileMutation {
        match result.result.as_ref() {
            Some(ActionOutput::File(file)) => file,
            other => panic!("expected file output, got {other:?}"),
        }
    }

    #[test]
    fn write_file_creates_then_backs_up_on_overwrite() {
        let fx = Fixture::new(ExecutorConfig::default());
        let created = fx.run(write_file("docs/a.md", "one"));
        assert!(created.ok, "{created:?}");
        assert!(file_output(&created).created);
        assert!(file_output(&created).backup.is_none());

        let overwritten = fx.run(write_file("docs/a.md", "two"));
        assert!(overwritten.ok);
        let backup = file_output(&overwritten).backup.clone().expect("backup");
        assert!(backup.starts_with(".actiongate/backups/"));
        assert_eq!(fx.read(&backup), "one");
        assert_eq!(fx.read("docs/a.md"), "two");
    }

    #[test]
    fn identical_write_follows_policy() {
        let fx = Fixture::new(ExecutorConfig::default());
        fx.write("a.txt", "same");
        let rejected = fx.run(write_file("a.txt", "same"));
        assert!(!rejected.ok);
        assert_eq!(rejected.error_kind, Some(ErrorKind::PatchMismatch));
        assert_eq!(fx.backup_count(), 0);

        let fx = Fixture::new(ExecutorConfig {
            identical_write: IdenticalWrite::Skip,
            ..ExecutorConfig::default()
        });
        fx.write("a.txt", "same");
        let skipped = fx.run(write_file("a.txt", "same"));
        assert!(skipped.ok && skipped.skipped);
    }

    /// Verifies a patch whose anchor is gone leaves the file and backup dir untouched.
    #[test]
    fn mismatched_patch_changes_nothing() {
        let fx = Fixture::new(ExecutorConfig::default());
        fx.write("styles.css", ".a { color: red; }\n");
        let result = fx.run(patch("styles.css", ".b {", ".c {"));
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::PatchMismatch));
        assert_eq!(fx.read("styles.css"), ".a { color: red; }\n");
        assert_eq!(fx.backup_count(), 0);

        let noop = fx.run(patch("styles.css", "red", "red"));
        assert_eq!(noop.error_kind, Some(ErrorKind::PatchMismatch));
    }

    #[test]
    fn applied_patch_keeps_restorable_backup() {
        let fx = Fixture::new(ExecutorConfig::default());
        fx.write("styles.css", ".a { color: red; }\n");
        let result = fx.run(patch("styles.css", "red", "blue"));
        assert!(result.ok);
        assert_eq!(fx.read("styles.css"), ".a { color: blue; }\n");

        let backup = file_output(&result).backup.clone().expect("backup");
        fx.executor
            .restore_backup(&backup, "styles.css")
            .expect("restore");
        assert_eq!(fx.read("styles.css"), ".a { color: red; }\n");
    }

    #[test]
    fn paths_outside_root_fail_before_io() {
        let fx = Fixture::new(ExecutorConfig::default());
        let result = fx.run(write_file("../escape.txt", "x"));
        assert_eq!(result.error_kind, Some(ErrorKind::PathEscape));
        let result = fx.run(write_file(".actiongate/state/actions.json", "[]"));
        assert_eq!(result.error_kind, Some(ErrorKind::PathEscape));
    }

    /// Verifies bundles stop at the first failure and report every attempted step.
    #[test]
    fn bundle_aborts_at_first_failure() {
        let fx = Fixture::new(ExecutorConfig::default());
        fx.write("a.txt", "alpha");
        let kind = ActionKind::Bundle(BundlePayload {
            steps: vec![
                patch("a.txt", "alpha", "beta"),
                ActionKind::Restart(SignalPayload::default()),
                patch("a.txt", "missing", "x"),
                write_file("never.txt", "x"),
            ],
        });
        let result = fx.run(kind);
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ErrorKind::BundleStep));
        assert!(result.restart_requested);
        let Some(ActionOutput::Bundle(report)) = &result.result else {
            panic!("expected bundle report");
        };
        assert_eq!(report.steps.len(), 3);
        assert!(report.steps[0].ok && report.steps[1].ok && !report.steps[2].ok);
        assert_eq!(fx.read("a.txt"), "beta");
        assert!(!fx.temp.path().join("never.txt").exists());
    }

    #[test]
    fn second_execution_is_skipped() {
        let fx = Fixture::new(ExecutorConfig::default());
        let action = Action::new(write_file("a.txt", "x"), "t", "");
        let first = fx.executor.execute(&action, ExecOptions::default());
        assert!(first.ok && !first.skipped);
        let second = fx.executor.execute(&action, ExecOptions::default());
        assert!(second.ok && second.skipped);
        assert!(fx.executor.guard().was_executed(&action.id));
    }

    #[test]
    fn guard_evicts_oldest_ids() {
        let guard = ExecutionGuard::new(2);
        for id in ["a", "b", "c"] {
            match guard.admit(id) {
                Admission::Admitted(ticket) => ticket.complete(),
                _ => panic!("expected admission for {id}"),
            }
        }
        assert!(!guard.was_executed("a"));
        assert!(guard.was_executed("c"));
        let Admission::Admitted(held) = guard.admit("d") else {
            panic!("expected admission");
        };
        assert!(matches!(guard.admit("d"), Admission::InFlight));
        drop(held);
        assert!(matches!(guard.admit("d"), Admission::Admitted(_)));
    }

    #[test]
    fn dry_run_mutates_nothing() {
        let fx = Fixture::new(ExecutorConfig::default());
        let action = Action::new(write_file("a.txt", "x"), "t", "");
        let result = fx
            .executor
            .execute(&action, ExecOptions { dry_run: true });
        assert!(result.ok);
        assert!(result.reason.as_deref().is_some_and(|r| r.starts_with("dry run")));
        assert!(!fx.temp.path().join("a.txt").exists());
        assert!(!fx.executor.guard().was_executed(&action.id));
    }

    #[cfg(unix)]
    #[test]
    fn commands_report_exit_codes_and_timeouts() {
        let fx = Fixture::new(ExecutorConfig::default());
        let ok = fx.run(shell("echo hi"));
        assert!(ok.ok);
        let Some(ActionOutput::Command(report)) = &ok.result else {
            panic!("expected command report");
        };
        assert_eq!(report.stdout, "hi\n");

        let failed = fx.run(shell("exit 4"));
        assert!(!failed.ok);
        assert_eq!(failed.error_kind, Some(ErrorKind::Command));

        let slow = fx.run(ActionKind::RunCmd(RunCmdPayload {
            cmd: "sleep 3".to_string(),
            cwd: None,
            timeout_secs: Some(1),
            search: None,
        }));
        assert!(!slow.ok);
        let Some(ActionOutput::Command(report)) = &slow.result else {
            panic!("expected command report");
        };
        assert!(report.timed_out);
    }

    #[test]
    fn search_runs_in_process() {
        let fx = Fixture::new(ExecutorConfig::default());
        fx.write("public/index.html", "<header class=\"top\">\n");
        let result = fx.run(ActionKind::RunCmd(RunCmdPayload {
            cmd: "rg header".to_string(),
            cwd: None,
            timeout_secs: None,
            search: Some(SearchSpec {
                pattern: "header".to_string(),
                max_results: 5,
            }),
        }));
        let Some(ActionOutput::Command(report)) = &result.result else {
            panic!("expected command report");
        };
        assert_eq!(report.stdout, "public/index.html:1:2:<header class=\"top\">\n");
    }

    #[test]
    fn snippet_reads_inclusive_window() {
        let fx = Fixture::new(ExecutorConfig::default());
        fx.write("a.txt", "1\n2\n3\n4\n5\n");
        let result = fx.run(ActionKind::ReadSnippet(ReadSnippetPayload {
            path: "a.txt".to_string(),
            start_line: 2,
            end_line: Some(40),
        }));
        let Some(ActionOutput::Snippet(report)) = &result.result else {
            panic!("expected snippet");
        };
        assert_eq!(report.text, "2\n3\n4\n5");
        assert_eq!((report.start_line, report.end_line), (2, 5));
    }

    #[test]
    fn html_title_is_replaced_with_backup() {
        let fx = Fixture::new(ExecutorConfig::default());
        fx.write("index.html", "<head><title>Old</title></head>");
        let result = fx.run(ActionKind::SetHtmlTitle(SetHtmlTitlePayload {
            path: "index.html".to_string(),
            title: "New".to_string(),
        }));
        assert!(result.ok, "{result:?}");
        assert_eq!(fx.read("index.html"), "<head><title>New</title></head>");
        assert!(file_output(&result).backup.is_some());

        let again = fx.run(ActionKind::SetHtmlTitle(SetHtmlTitlePayload {
            path: "index.html".to_string(),
            title: "New".to_string(),
        }));
        assert_eq!(again.error_kind, Some(ErrorKind::PatchMismatch));
    }

    #[test]
    fn mkdir_is_idempotent() {
        let fx = Fixture::new(ExecutorConfig::default());
        let mk = || {
            ActionKind::Mkdir(PathPayload {
                path: "a/b".to_string(),
            })
        };
        let first = fx.run(mk());
        let second = fx.run(mk());
        let created = |r: &ExecResult| match &r.result {
            Some(ActionOutput::Directory(dir)) => dir.created,
            _ => panic!("expected directory output"),
        };
        assert!(created(&first));
        assert!(!created(&second));
    }
}
