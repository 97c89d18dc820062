//! Turn-scoped grounding snapshot built from disk and the action queue.

use std::fs;

use tracing::{debug, instrument, warn};

use crate::action::Action;
use crate::core::grounding::{correlated, inspection_record, inspection_stage};
use crate::core::path::normalize_relative;
use crate::core::types::{Intent, Snapshot};
use crate::io::config::GroundingConfig;
use crate::io::workspace::Workspace;

pub struct SnapshotBuilder<'a> {
    workspace: &'a Workspace,
    config: &'a GroundingConfig,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(workspace: &'a Workspace, config: &'a GroundingConfig) -> Self {
        Self { workspace, config }
    }

    /// Build a fresh snapshot for `message`. Never persisted.
    #[instrument(skip_all, fields(actions = actions.len()))]
    pub fn build(&self, message: &str, last_intent: Option<Intent>, actions: &[Action]) -> Snapshot {
        let mut snapshot = Snapshot {
            message: message.to_string(),
            last_intent,
            ..Snapshot::default()
        };

        for file in &self.config.files {
            self.read_into(&mut snapshot, file);
        }

        let records: Vec<_> = correlated(actions, message)
            .into_iter()
            .filter_map(inspection_record)
            .collect();
        for record in &records {
            if let Some(path) = &record.path
                && !snapshot.raw_files.contains_key(path)
            {
                self.read_into(&mut snapshot, path);
            }
        }
        snapshot.inspection_stage = inspection_stage(&records);
        snapshot.run_cmd_outputs = records;

        debug!(
            files = snapshot.raw_files.len(),
            truncated = snapshot.truncated_files.len(),
            inspections = snapshot.run_cmd_outputs.len(),
            "snapshot built"
        );
        snapshot
    }

    /// Read one allowlisted file, capped at `max_file_bytes`. Missing and
    /// non-UTF-8 files are absent from the snapshot, since the executor could
    /// not edit them either.
    fn read_into(&self, snapshot: &mut Snapshot, raw: &str) {
        let Ok(rel) = normalize_relative(raw) else {
            warn!(path = raw, "skipping invalid grounding path");
            return;
        };
        let Ok(path) = self.workspace.resolve(&rel) else {
            warn!(path = %rel, "skipping grounding path outside the project");
            return;
        };
        let Ok(bytes) = fs::read(&path) else {
            return;
        };
        let limit = self.config.max_file_bytes;
        if bytes.len() > limit {
            let head = &bytes[..limit];
            let text = match std::str::from_utf8(head) {
                Ok(text) => text,
                // Only a code point split by the cap is tolerated.
                Err(err) if err.error_len().is_none() => {
                    std::str::from_utf8(&head[..err.valid_up_to()]).unwrap_or_default()
                }
                Err(_) => {
                    warn!(path = %rel, "skipping grounding file that is not UTF-8");
                    return;
                }
            };
            debug!(path = %rel, kept = text.len(), total = bytes.len(), "grounding file truncated");
            snapshot.truncated_files.insert(rel.clone());
            snapshot.raw_files.insert(rel, text.to_string());
        } else {
            match String::from_utf8(bytes) {
                Ok(text) => {
                    snapshot.raw_files.insert(rel, text);
                }
                Err(_) => warn!(path = %rel, "skipping grounding file that is not UTF-8"),
            }
        }
    }
}
