//! Diff previews for queued actions.
//!
//! Bundles are previewed against a virtual overlay so later steps see the
//! effect of earlier ones without touching disk.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use similar::TextDiff;

use crate::action::ActionKind;
use crate::core::html::{TitleError, replace_title};
use crate::core::patch::apply_strict;
use crate::core::path::normalize_relative;
use crate::core::types::FileLookup;

/// Unified diff with three lines of context; empty when texts are equal.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChange {
    Create,
    Modify,
    Mkdir,
    Unchanged,
    /// The step would fail against current content.
    Mismatch,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewFile {
    pub path: String,
    pub change: FileChange,
    pub diff: String,
}

/// Preview every file an action would touch. Non-previewable kinds yield an
/// empty list.
pub fn preview_kind(kind: &ActionKind, lookup: &dyn FileLookup) -> Vec<PreviewFile> {
    let mut overlay = Overlay {
        base: lookup,
        files: BTreeMap::new(),
        dirs: BTreeSet::new(),
    };
    let mut out = Vec::new();
    preview_into(kind, &mut overlay, &mut out);
    out
}

struct Overlay<'a> {
    base: &'a dyn FileLookup,
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

impl FileLookup for Overlay<'_> {
    fn read(&self, path: &str) -> Option<String> {
        self.files
            .get(path)
            .cloned()
            .or_else(|| self.base.read(path))
    }

    fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path) || self.base.is_dir(path)
    }
}

fn preview_into(kind: &ActionKind, overlay: &mut Overlay<'_>, out: &mut Vec<PreviewFile>) {
    match kind {
        ActionKind::ApplyPatch(payload) => {
            let Some(path) = checked(&payload.path, out) else {
                return;
            };
            let Some(old) = overlay.read(&path) else {
                out.push(file(path, FileChange::Mismatch, String::new()));
                return;
            };
            match apply_strict(&old, &payload.edits) {
                Ok(new) => {
                    let diff = unified_diff(&path, &old, &new);
                    overlay.files.insert(path.clone(), new);
                    out.push(file(path, FileChange::Modify, diff));
                }
                Err(_) => out.push(file(path, FileChange::Mismatch, String::new())),
            }
        }
        ActionKind::WriteFile(payload) => {
            let Some(path) = checked(&payload.path, out) else {
                return;
            };
            let old = overlay.read(&path);
            let change = match &old {
                None => FileChange::Create,
                Some(existing) if *existing == payload.content => FileChange::Unchanged,
                Some(_) => FileChange::Modify,
            };
            let diff = unified_diff(&path, old.as_deref().unwrap_or(""), &payload.content);
            overlay.files.insert(path.clone(), payload.content.clone());
            out.push(file(path, change, diff));
        }
        ActionKind::Mkdir(payload) => {
            let Some(path) = checked(&payload.path, out) else {
                return;
            };
            let change = if overlay.is_dir(&path) {
                FileChange::Unchanged
            } else {
                FileChange::Mkdir
            };
            overlay.dirs.insert(path.clone());
            out.push(file(path, change, String::new()));
        }
        ActionKind::SetHtmlTitle(payload) => {
            let Some(path) = checked(&payload.path, out) else {
                return;
            };
            let Some(old) = overlay.read(&path) else {
                out.push(file(path, FileChange::Mismatch, String::new()));
                return;
            };
            match replace_title(&old, &payload.title) {
                Ok(new) => {
                    let diff = unified_diff(&path, &old, &new);
                    overlay.files.insert(path.clone(), new);
                    out.push(file(path, FileChange::Modify, diff));
                }
                Err(TitleError::Unchanged) => {
                    out.push(file(path, FileChange::Unchanged, String::new()));
                }
                Err(TitleError::Missing) => {
                    out.push(file(path, FileChange::Mismatch, String::new()));
                }
            }
        }
        ActionKind::Bundle(payload) => {
            for step in &payload.steps {
                preview_into(step, overlay, out);
            }
        }
        ActionKind::RunCmd(_)
        | ActionKind::Restart(_)
        | ActionKind::Off(_)
        | ActionKind::ReadSnippet(_)
        | ActionKind::LaunchApp(_)
        | ActionKind::OpenPath(_) => {}
    }
}

fn checked(raw: &str, out: &mut Vec<PreviewFile>) -> Option<String> {
    match normalize_relative(raw) {
        Ok(path) => Some(path),
        Err(_) => {
            out.push(file(raw.to_string(), FileChange::Invalid, String::new()));
            None
        }
    }
}

fn file(path: String, change: FileChange, diff: String) -> PreviewFile {
    PreviewFile { path, change, diff }
}
