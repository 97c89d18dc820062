//! Queued action records and their strongly-typed payloads.
//!
//! An [`Action`] serializes as a flat JSON object whose `type` and `payload`
//! keys come from the [`ActionKind`] sum type, so the persisted queue keeps a
//! stable, human-readable shape while the executor never guesses payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ActionError, ErrorKind};

/// Lifecycle state of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Done,
    Failed,
    Rejected,
    RolledBack,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Done => "done",
            ActionStatus::Failed => "failed",
            ActionStatus::Rejected => "rejected",
            ActionStatus::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single [`PatchEdit`] is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    /// Replace the first occurrence of `find`.
    #[default]
    Once,
    /// Replace every occurrence of `find`.
    All,
    /// Ignore `find` and concatenate `replace` to the end of the file.
    Append,
}

/// One literal find/replace edit. `find` is captured from the file content the
/// edit was compiled against, never regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEdit {
    #[serde(default)]
    pub find: String,
    #[serde(default)]
    pub replace: String,
    #[serde(default)]
    pub mode: EditMode,
}

impl PatchEdit {
    pub fn once(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
            mode: EditMode::Once,
        }
    }

    pub fn append(text: impl Into<String>) -> Self {
        Self {
            find: String::new(),
            replace: text.into(),
            mode: EditMode::Append,
        }
    }
}

/// Read-only repository search carried by an inspection `run_cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSpec {
    pub pattern: String,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
}

fn default_search_results() -> usize {
    40
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCmdPayload {
    #[serde(default)]
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFilePayload {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPatchPayload {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub edits: Vec<PatchEdit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPayload {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePayload {
    #[serde(default)]
    pub steps: Vec<ActionKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadSnippetPayload {
    #[serde(default)]
    pub path: String,
    #[serde(default = "first_line")]
    pub start_line: usize,
    #[serde(default)]
    pub end_line: Option<usize>,
}

fn first_line() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetHtmlTitlePayload {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchAppPayload {
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Every kind of side effect the executor knows how to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ActionKind {
    RunCmd(RunCmdPayload),
    WriteFile(WriteFilePayload),
    ApplyPatch(ApplyPatchPayload),
    Mkdir(PathPayload),
    Bundle(BundlePayload),
    Restart(SignalPayload),
    Off(SignalPayload),
    ReadSnippet(ReadSnippetPayload),
    SetHtmlTitle(SetHtmlTitlePayload),
    LaunchApp(LaunchAppPayload),
    OpenPath(PathPayload),
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::RunCmd(_) => "run_cmd",
            ActionKind::WriteFile(_) => "write_file",
            ActionKind::ApplyPatch(_) => "apply_patch",
            ActionKind::Mkdir(_) => "mkdir",
            ActionKind::Bundle(_) => "bundle",
            ActionKind::Restart(_) => "restart",
            ActionKind::Off(_) => "off",
            ActionKind::ReadSnippet(_) => "read_snippet",
            ActionKind::SetHtmlTitle(_) => "set_html_title",
            ActionKind::LaunchApp(_) => "launch_app",
            ActionKind::OpenPath(_) => "open_path",
        }
    }

    /// Kinds that have a meaningful diff preview.
    pub fn is_previewable(&self) -> bool {
        matches!(
            self,
            ActionKind::ApplyPatch(_)
                | ActionKind::WriteFile(_)
                | ActionKind::Bundle(_)
                | ActionKind::Mkdir(_)
                | ActionKind::SetHtmlTitle(_)
        )
    }

    /// Decode a `{type, payload}` JSON object. A missing or null payload is
    /// treated as `{}` so signal kinds can be queued without one.
    pub fn from_json(mut value: serde_json::Value) -> Result<Self, ActionError> {
        let obj = value
            .as_object_mut()
            .ok_or_else(|| ActionError::Validation("action must be a JSON object".to_string()))?;
        if obj.get("payload").is_none_or(serde_json::Value::is_null) {
            obj.insert("payload".to_string(), serde_json::json!({}));
        }
        serde_json::from_value(value).map_err(|err| ActionError::Validation(err.to_string()))
    }
}

/// Which escalation step produced a follow-up inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionKind {
    Rg,
    Snippet,
    Other,
}

impl InspectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InspectionKind::Rg => "rg",
            InspectionKind::Snippet => "snippet",
            InspectionKind::Other => "other",
        }
    }
}

/// Compiler-attached diff hint shown next to the approval item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewHint {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionMeta {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub followup: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspection_kind: Option<InspectionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewHint>,
}

impl ActionMeta {
    pub fn is_empty(&self) -> bool {
        *self == ActionMeta::default()
    }

    /// Meta for an inspection that must be correlated with `message` later.
    pub fn followup(message: &str, kind: InspectionKind) -> Self {
        Self {
            followup: true,
            original_message: Some(message.to_string()),
            inspection_kind: Some(kind),
            preview: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReport {
    pub cmd: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub truncated_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMutation {
    pub path: String,
    #[serde(default)]
    pub backup: Option<String>,
    pub created: bool,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryReport {
    pub directory: String,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnippetReport {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReport {
    pub signal: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchReport {
    pub launched: String,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReport {
    pub steps: Vec<ExecResult>,
}

/// Typed executor output stored under `result.result`.
///
/// Variants are distinguished by their required keys; order matters for
/// decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionOutput {
    Bundle(BundleReport),
    Command(CommandReport),
    Snippet(SnippetReport),
    Launch(LaunchReport),
    Signal(SignalReport),
    Directory(DirectoryReport),
    File(FileMutation),
}

/// Outcome of executing one action (or one bundle step).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restart_requested: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub off_requested: bool,
}

impl ExecResult {
    pub fn success(output: ActionOutput) -> Self {
        Self {
            ok: true,
            result: Some(output),
            ..Self::default()
        }
    }

    pub fn failure(err: &ActionError) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Self::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            ok: true,
            skipped: true,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: ActionOutput) -> Self {
        self.result = Some(output);
        self
    }

    /// Plain-language failure text for end users.
    pub fn user_message(&self) -> Option<&'static str> {
        if self.ok {
            return None;
        }
        Some(self.error_kind.unwrap_or(ErrorKind::Io).user_message())
    }
}

/// A queued unit of work with an approval/execution lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub reason: String,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub result: Option<ExecResult>,
    #[serde(default, skip_serializing_if = "ActionMeta::is_empty")]
    pub meta: ActionMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Action {
    /// Create a fresh `pending` action with a new unique id.
    pub fn new(kind: ActionKind, title: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            reason: reason.into(),
            status: ActionStatus::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            meta: ActionMeta::default(),
            note: None,
        }
    }

    pub fn with_meta(mut self, meta: ActionMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn is_followup(&self) -> bool {
        self.meta.followup && self.meta.original_message.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_serializes_type_and_payload_at_top_level() {
        let action = Action::new(
            ActionKind::WriteFile(WriteFilePayload {
                path: "a.txt".to_string(),
                content: "hi".to_string(),
            }),
            "Write a",
            "because",
        );
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(value["type"], "write_file");
        assert_eq!(value["payload"]["path"], "a.txt");
        assert_eq!(value["status"], "pending");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("meta").is_none());

        let back: Action = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, action);
    }

    #[test]
    fn signal_kind_decodes_without_payload() {
        let kind = ActionKind::from_json(json!({"type": "restart"})).expect("decode");
        assert_eq!(kind, ActionKind::Restart(SignalPayload::default()));
    }

    #[test]
    fn unknown_type_is_a_validation_error() {
        let err = ActionKind::from_json(json!({"type": "format_disk", "payload": {}}))
            .expect_err("unknown type");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn outputs_decode_to_the_variant_with_matching_keys() {
        let file: ActionOutput =
            serde_json::from_value(json!({"path": "a", "backup": null, "created": true, "bytes": 3}))
                .expect("file");
        assert!(matches!(file, ActionOutput::File(_)));

        let snippet: ActionOutput = serde_json::from_value(
            json!({"path": "a", "startLine": 1, "endLine": 2, "text": "x"}),
        )
        .expect("snippet");
        assert!(matches!(snippet, ActionOutput::Snippet(_)));

        let dir: ActionOutput =
            serde_json::from_value(json!({"directory": "d", "created": false})).expect("dir");
        assert!(matches!(dir, ActionOutput::Directory(_)));
    }

    #[test]
    fn bundle_steps_nest_action_kinds() {
        let kind = ActionKind::from_json(json!({
            "type": "bundle",
            "payload": {"steps": [
                {"type": "mkdir", "payload": {"path": "d"}},
                {"type": "off", "payload": {}}
            ]}
        }))
        .expect("decode");
        let ActionKind::Bundle(bundle) = kind else {
            panic!("expected bundle");
        };
        assert_eq!(bundle.steps.len(), 2);
        assert_eq!(bundle.steps[1].type_name(), "off");
    }
}
