//! Shared deterministic types for the planning core.
//!
//! These types define the contracts between the oracle, the snapshot builder,
//! the compiler and the turn loop. They carry no I/O and serialize with stable
//! camelCase keys because snapshots are rendered into oracle prompts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::action::{ActionKind, ActionMeta, InspectionKind, PatchEdit};

/// Turn classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Chat,
    Plan,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Plan => "plan",
        }
    }
}

/// Abstract, oracle-proposed operation prior to compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PlanOp {
    CssPatch {
        #[serde(default)]
        path: Option<String>,
        selector: String,
        #[serde(default)]
        set: BTreeMap<String, String>,
        #[serde(default)]
        unset: Vec<String>,
        #[serde(default)]
        why: String,
    },
    ApplyPatch {
        path: String,
        #[serde(default)]
        edits: Vec<PatchEdit>,
        #[serde(default)]
        why: String,
    },
    WriteFile {
        path: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        why: String,
    },
    Mkdir {
        path: String,
        #[serde(default)]
        why: String,
    },
    RunCmd {
        cmd: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        why: String,
    },
    ReadSnippet {
        path: String,
        #[serde(default)]
        start_line: Option<usize>,
        #[serde(default)]
        end_line: Option<usize>,
        #[serde(default)]
        why: String,
    },
    Restart {
        #[serde(default)]
        why: String,
    },
    Off {
        #[serde(default)]
        why: String,
    },
    SetHtmlTitle {
        #[serde(default)]
        path: Option<String>,
        title: String,
        #[serde(default)]
        why: String,
    },
}

impl PlanOp {
    pub fn name(&self) -> &'static str {
        match self {
            PlanOp::CssPatch { .. } => "css_patch",
            PlanOp::ApplyPatch { .. } => "apply_patch",
            PlanOp::WriteFile { .. } => "write_file",
            PlanOp::Mkdir { .. } => "mkdir",
            PlanOp::RunCmd { .. } => "run_cmd",
            PlanOp::ReadSnippet { .. } => "read_snippet",
            PlanOp::Restart { .. } => "restart",
            PlanOp::Off { .. } => "off",
            PlanOp::SetHtmlTitle { .. } => "set_html_title",
        }
    }

    pub fn why(&self) -> &str {
        match self {
            PlanOp::CssPatch { why, .. }
            | PlanOp::ApplyPatch { why, .. }
            | PlanOp::WriteFile { why, .. }
            | PlanOp::Mkdir { why, .. }
            | PlanOp::RunCmd { why, .. }
            | PlanOp::ReadSnippet { why, .. }
            | PlanOp::Restart { why }
            | PlanOp::Off { why }
            | PlanOp::SetHtmlTitle { why, .. } => why,
        }
    }

    /// Target path named by the op, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            PlanOp::CssPatch { path, .. } | PlanOp::SetHtmlTitle { path, .. } => path.as_deref(),
            PlanOp::ApplyPatch { path, .. }
            | PlanOp::WriteFile { path, .. }
            | PlanOp::Mkdir { path, .. }
            | PlanOp::ReadSnippet { path, .. } => Some(path),
            PlanOp::RunCmd { .. } | PlanOp::Restart { .. } | PlanOp::Off { .. } => None,
        }
    }
}

/// Structured oracle plan output after sanitization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    pub reply: String,
    pub requires_approval: bool,
    pub ops: Vec<PlanOp>,
}

/// One line of repository search output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: usize,
    pub col: usize,
    pub text: String,
}

impl SearchMatch {
    /// Render as a `file:line:col:text` vimgrep line.
    pub fn vimgrep(&self) -> String {
        format!("{}:{}:{}:{}", self.file, self.line, self.col, self.text)
    }
}

/// A prior inspection whose output is correlated with the current message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRecord {
    pub action_id: String,
    pub kind: InspectionKind,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub output: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<SearchMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,
}

/// Progress flags of the escalation ladder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionStage {
    pub has_rg: bool,
    pub has_snippet: bool,
    pub rg_hits: usize,
}

/// Turn-scoped grounding facts. Rebuilt every pass, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub message: String,
    pub last_intent: Option<Intent>,
    pub raw_files: BTreeMap<String, String>,
    /// Files whose `raw_files` entry was cut at the size cap.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub truncated_files: BTreeSet<String>,
    pub run_cmd_outputs: Vec<InspectionRecord>,
    pub inspection_stage: InspectionStage,
}

impl Snapshot {
    /// Complete file text held by the snapshot (truncated entries excluded).
    pub fn file(&self, path: &str) -> Option<&str> {
        if self.truncated_files.contains(path) {
            return None;
        }
        self.raw_files.get(path).map(String::as_str)
    }

    pub fn search_matches(&self) -> impl Iterator<Item = &SearchMatch> {
        self.run_cmd_outputs
            .iter()
            .filter(|record| record.kind == InspectionKind::Rg)
            .flat_map(|record| record.matches.iter())
    }
}

/// Read-only access to project files for the compiler and previews.
pub trait FileLookup {
    /// Full UTF-8 content of a project-relative file, if it exists.
    fn read(&self, path: &str) -> Option<String>;
    fn is_dir(&self, path: &str) -> bool;
}

impl FileLookup for BTreeMap<String, String> {
    fn read(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.keys().any(|key| key.starts_with(&prefix))
    }
}

/// A compiled, not-yet-queued action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDraft {
    pub kind: ActionKind,
    pub title: String,
    pub reason: String,
    pub meta: ActionMeta,
}

impl ActionDraft {
    pub fn new(kind: ActionKind, title: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            reason: reason.into(),
            meta: ActionMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: ActionMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn is_inspection(&self) -> bool {
        self.meta.followup
            && matches!(self.kind, ActionKind::RunCmd(_) | ActionKind::ReadSnippet(_))
    }
}

/// Result of compiling a single op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// Mutation that needs human approval.
    Action(ActionDraft),
    /// Read-only inspection that may run without approval.
    Inspection(ActionDraft),
    /// The op is already satisfied by the current file content.
    Noop,
    /// The op could not be grounded in the current content.
    NeedsMoreContext(String),
    /// The op is malformed or unsafe.
    Invalid(String),
}

/// What a whole planning pass compiled to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// Exactly one approval item (a bundle when several ops compiled).
    Proposal(ActionDraft),
    /// One read-only inspection to auto-run before re-planning.
    Inspection(ActionDraft),
    /// Stop and ask the user for the exact file or section.
    Clarify(String),
    /// Nothing to do; see [`Compilation::noops`].
    Nothing,
}

/// Compiler result plus per-op bookkeeping for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compilation {
    pub outcome: CompileOutcome,
    pub noops: usize,
    pub needs_context: Vec<String>,
    pub invalid: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_op_decodes_camel_case_fields() {
        let op: PlanOp = serde_json::from_value(json!({
            "op": "read_snippet",
            "path": "public/index.html",
            "startLine": 3,
            "endLine": 9
        }))
        .expect("decode");
        assert_eq!(
            op,
            PlanOp::ReadSnippet {
                path: "public/index.html".to_string(),
                start_line: Some(3),
                end_line: Some(9),
                why: String::new(),
            }
        );
    }

    #[test]
    fn css_patch_defaults_optional_fields() {
        let op: PlanOp = serde_json::from_value(json!({"op": "css_patch", "selector": ".btn"}))
            .expect("decode");
        let PlanOp::CssPatch { set, unset, path, .. } = op else {
            panic!("expected css_patch");
        };
        assert!(set.is_empty());
        assert!(unset.is_empty());
        assert!(path.is_none());
    }

    #[test]
    fn snapshot_hides_truncated_files_from_compiler() {
        let mut snapshot = Snapshot::default();
        snapshot
            .raw_files
            .insert("a.css".to_string(), "partial".to_string());
        snapshot.truncated_files.insert("a.css".to_string());
        assert!(snapshot.file("a.css").is_none());
    }

    #[test]
    fn map_lookup_reports_directories_from_prefixes() {
        let mut files = BTreeMap::new();
        files.insert("public/index.html".to_string(), String::new());
        assert!(files.is_dir("public"));
        assert!(!files.is_dir("pub"));
    }
}
