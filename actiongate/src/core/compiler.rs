//! Patch compiler: oracle ops to at most one deterministic approval item.
//!
//! Every `find` anchor the compiler emits is cut from the file content it
//! compiled against (snapshot first, then the [`FileLookup`] fallback), so the
//! preview attached to a draft is exactly what execution will do. Within one
//! plan, later ops compile against the text earlier ops leave behind, matching
//! the order bundle steps run in.

use std::collections::{BTreeMap, BTreeSet};

use crate::action::{
    ActionKind, ActionMeta, ApplyPatchPayload, BundlePayload, InspectionKind, PathPayload,
    PreviewHint, ReadSnippetPayload, RunCmdPayload, SetHtmlTitlePayload, SignalPayload,
    WriteFilePayload,
};
use crate::core::css::{CssPatch, compile_css_patch};
use crate::core::escalation::{Escalation, EscalationConfig, escalate};
use crate::core::html::{TitleError, replace_title};
use crate::core::patch::{matching_edits, simulate};
use crate::core::path::normalize_relative;
use crate::core::preview::unified_diff;
use crate::core::types::{
    ActionDraft, Compilation, CompileOutcome, FileLookup, OpOutcome, Plan, PlanOp, Snapshot,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Stylesheet used when a `css_patch` names no path.
    pub default_stylesheet: String,
    /// Document used when a `set_html_title` names no path.
    pub default_html: String,
    pub escalation: EscalationConfig,
}

/// Compile a whole plan into a single outcome.
pub fn compile_plan(
    plan: &Plan,
    snapshot: &Snapshot,
    lookup: &dyn FileLookup,
    config: &CompilerConfig,
) -> Compilation {
    let mut mutations = Vec::new();
    let mut inspections = Vec::new();
    let mut noops = 0usize;
    let mut needs_context = Vec::new();
    let mut invalid = Vec::new();
    let mut view = PlanView::new(snapshot, lookup);

    for op in &plan.ops {
        match compile_in(op, &view, config) {
            OpOutcome::Action(draft) => {
                view.record(&draft.kind);
                mutations.push(draft);
            }
            OpOutcome::Inspection(draft) => inspections.push(draft),
            OpOutcome::Noop => noops += 1,
            OpOutcome::NeedsMoreContext(reason) => needs_context.push(reason),
            OpOutcome::Invalid(reason) => invalid.push(reason),
        }
    }

    let outcome = if !mutations.is_empty() {
        CompileOutcome::Proposal(bundle(mutations))
    } else if let Some(first) = inspections.into_iter().next() {
        CompileOutcome::Inspection(first)
    } else if !needs_context.is_empty() || (plan.requires_approval && noops == 0) {
        match escalate(snapshot, &plan.ops, &config.escalation) {
            Escalation::Inspect(draft) => CompileOutcome::Inspection(draft),
            Escalation::Clarify(reply) => CompileOutcome::Clarify(reply),
        }
    } else {
        CompileOutcome::Nothing
    };

    Compilation {
        outcome,
        noops,
        needs_context,
        invalid,
    }
}

/// Compile one op against the snapshot.
pub fn compile_op(
    op: &PlanOp,
    snapshot: &Snapshot,
    lookup: &dyn FileLookup,
    config: &CompilerConfig,
) -> OpOutcome {
    compile_in(op, &PlanView::new(snapshot, lookup), config)
}

/// Project files as seen part-way through a plan: edits from ops already
/// compiled, then the snapshot, then the lookup.
struct PlanView<'a> {
    snapshot: &'a Snapshot,
    lookup: &'a dyn FileLookup,
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

impl<'a> PlanView<'a> {
    fn new(snapshot: &'a Snapshot, lookup: &'a dyn FileLookup) -> Self {
        Self {
            snapshot,
            lookup,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
        }
    }

    fn text(&self, path: &str) -> Option<String> {
        self.files.get(path).cloned().or_else(|| {
            self.snapshot
                .file(path)
                .map(str::to_string)
                .or_else(|| self.lookup.read(path))
        })
    }

    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.dirs.contains(path)
            || self.files.keys().any(|key| key.starts_with(&prefix))
            || self.lookup.is_dir(path)
    }

    /// Apply a compiled draft's effect so the next op sees it.
    fn record(&mut self, kind: &ActionKind) {
        match kind {
            ActionKind::ApplyPatch(payload) => {
                if let Some(current) = self.text(&payload.path) {
                    let next = simulate(&current, &payload.edits).text;
                    self.files.insert(payload.path.clone(), next);
                }
            }
            ActionKind::WriteFile(payload) => {
                self.files
                    .insert(payload.path.clone(), payload.content.clone());
            }
            ActionKind::Mkdir(payload) => {
                self.dirs.insert(payload.path.clone());
            }
            ActionKind::SetHtmlTitle(payload) => {
                if let Some(current) = self.text(&payload.path)
                    && let Ok(next) = replace_title(&current, &payload.title)
                {
                    self.files.insert(payload.path.clone(), next);
                }
            }
            _ => {}
        }
    }
}

fn compile_in(op: &PlanOp, view: &PlanView<'_>, config: &CompilerConfig) -> OpOutcome {
    match op {
        PlanOp::CssPatch {
            path,
            selector,
            set,
            unset,
            why,
        } => {
            let path = match relative(path.as_deref().unwrap_or(&config.default_stylesheet)) {
                Ok(path) => path,
                Err(outcome) => return outcome,
            };
            let Some(current) = view.text(&path) else {
                return OpOutcome::NeedsMoreContext(format!("{path} not found"));
            };
            match compile_css_patch(&current, selector, set, unset) {
                Err(reason) => OpOutcome::Invalid(reason),
                Ok(CssPatch::Noop) => OpOutcome::Noop,
                Ok(CssPatch::Edit(edit)) => {
                    let edits = vec![edit];
                    let next = simulate(&current, &edits).text;
                    OpOutcome::Action(with_preview(
                        ActionDraft::new(
                            ActionKind::ApplyPatch(ApplyPatchPayload {
                                path: path.clone(),
                                edits,
                            }),
                            format!("Update {} in {path}", selector.trim()),
                            why,
                        ),
                        &path,
                        &current,
                        &next,
                    ))
                }
            }
        }
        PlanOp::ApplyPatch { path, edits, why } => {
            let path = match relative(path) {
                Ok(path) => path,
                Err(outcome) => return outcome,
            };
            if edits.is_empty() {
                return OpOutcome::Invalid(format!("apply_patch for {path} has no edits"));
            }
            let Some(current) = view.text(&path) else {
                return OpOutcome::NeedsMoreContext(format!("{path} not found"));
            };
            let kept = matching_edits(&current, edits);
            if kept.is_empty() {
                return OpOutcome::NeedsMoreContext(format!("no edit anchors found in {path}"));
            }
            let next = simulate(&current, &kept).text;
            if next == current {
                return OpOutcome::Noop;
            }
            OpOutcome::Action(with_preview(
                ActionDraft::new(
                    ActionKind::ApplyPatch(ApplyPatchPayload {
                        path: path.clone(),
                        edits: kept,
                    }),
                    format!("Edit {path}"),
                    why,
                ),
                &path,
                &current,
                &next,
            ))
        }
        PlanOp::WriteFile { path, content, why } => {
            let path = match relative(path) {
                Ok(path) => path,
                Err(outcome) => return outcome,
            };
            if view.is_dir(&path) {
                return OpOutcome::Invalid(format!("{path} is a directory"));
            }
            let current = view.text(&path);
            if current.as_deref() == Some(content.as_str()) {
                return OpOutcome::Noop;
            }
            let title = if current.is_some() {
                format!("Rewrite {path}")
            } else {
                format!("Create {path}")
            };
            OpOutcome::Action(with_preview(
                ActionDraft::new(
                    ActionKind::WriteFile(WriteFilePayload {
                        path: path.clone(),
                        content: content.clone(),
                    }),
                    title,
                    why,
                ),
                &path,
                current.as_deref().unwrap_or(""),
                content,
            ))
        }
        PlanOp::Mkdir { path, why } => {
            let path = match relative(path) {
                Ok(path) => path,
                Err(outcome) => return outcome,
            };
            if view.is_dir(&path) {
                return OpOutcome::Noop;
            }
            OpOutcome::Action(ActionDraft::new(
                ActionKind::Mkdir(PathPayload { path: path.clone() }),
                format!("Create folder {path}"),
                why,
            ))
        }
        PlanOp::RunCmd { cmd, cwd, why } => {
            let cmd = cmd.trim();
            if cmd.is_empty() {
                return OpOutcome::Invalid("run_cmd has an empty command".to_string());
            }
            let cwd = match cwd.as_deref().map(relative).transpose() {
                Ok(cwd) => cwd,
                Err(outcome) => return outcome,
            };
            OpOutcome::Action(ActionDraft::new(
                ActionKind::RunCmd(RunCmdPayload {
                    cmd: cmd.to_string(),
                    cwd,
                    timeout_secs: None,
                    search: None,
                }),
                format!("Run `{cmd}`"),
                why,
            ))
        }
        PlanOp::ReadSnippet {
            path,
            start_line,
            end_line,
            why,
        } => {
            let path = match relative(path) {
                Ok(path) => path,
                Err(outcome) => return outcome,
            };
            let start_line = start_line.unwrap_or(1).max(1);
            let end_line = end_line.filter(|end| *end >= start_line);
            OpOutcome::Inspection(
                ActionDraft::new(
                    ActionKind::ReadSnippet(ReadSnippetPayload {
                        path: path.clone(),
                        start_line,
                        end_line,
                    }),
                    format!("Read {path}"),
                    why,
                )
                .with_meta(ActionMeta::followup(
                    &view.snapshot.message,
                    InspectionKind::Snippet,
                )),
            )
        }
        PlanOp::Restart { why } => OpOutcome::Action(ActionDraft::new(
            ActionKind::Restart(signal_note(why)),
            "Restart the assistant",
            why,
        )),
        PlanOp::Off { why } => OpOutcome::Action(ActionDraft::new(
            ActionKind::Off(signal_note(why)),
            "Turn the assistant off",
            why,
        )),
        PlanOp::SetHtmlTitle { path, title, why } => {
            let path = match relative(path.as_deref().unwrap_or(&config.default_html)) {
                Ok(path) => path,
                Err(outcome) => return outcome,
            };
            if title.trim().is_empty() {
                return OpOutcome::Invalid("set_html_title has an empty title".to_string());
            }
            let Some(current) = view.text(&path) else {
                return OpOutcome::NeedsMoreContext(format!("{path} not found"));
            };
            match replace_title(&current, title) {
                Err(TitleError::Unchanged) => OpOutcome::Noop,
                Err(TitleError::Missing) => {
                    OpOutcome::NeedsMoreContext(format!("no <title> element in {path}"))
                }
                Ok(next) => OpOutcome::Action(with_preview(
                    ActionDraft::new(
                        ActionKind::SetHtmlTitle(SetHtmlTitlePayload {
                            path: path.clone(),
                            title: title.trim().to_string(),
                        }),
                        format!("Set page title to \"{}\"", title.trim()),
                        why,
                    ),
                    &path,
                    &current,
                    &next,
                )),
            }
        }
    }
}

/// Wrap several drafts into one bundle so a pass yields one decision point.
fn bundle(mut drafts: Vec<ActionDraft>) -> ActionDraft {
    if drafts.len() == 1 {
        return drafts.remove(0);
    }
    let reason = drafts
        .iter()
        .map(|draft| draft.reason.trim())
        .filter(|reason| !reason.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    let title = format!("Apply {} changes", drafts.len());
    let steps = drafts.into_iter().map(|draft| draft.kind).collect();
    ActionDraft::new(ActionKind::Bundle(BundlePayload { steps }), title, reason)
}

fn relative(raw: &str) -> Result<String, OpOutcome> {
    normalize_relative(raw).map_err(OpOutcome::Invalid)
}

fn with_preview(draft: ActionDraft, path: &str, old: &str, new: &str) -> ActionDraft {
    let mut meta = draft.meta.clone();
    meta.preview = Some(PreviewHint {
        path: path.to_string(),
        diff: unified_diff(path, old, new),
    });
    draft.with_meta(meta)
}

fn signal_note(why: &str) -> SignalPayload {
    SignalPayload {
        note: (!why.trim().is_empty()).then(|| why.trim().to_string()),
    }
}
