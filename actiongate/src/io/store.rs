//! Durable action queue stored as a JSON array, newest first.
//!
//! Loading never fails: unreadable or unparsable files yield an empty queue
//! and malformed records are repaired or dropped individually.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::action::{Action, ActionKind, ActionMeta, ActionStatus, ExecResult};

/// Fields merged into an existing action by [`ActionStore::update`].
#[derive(Debug, Clone, Default)]
pub struct ActionPatch {
    pub status: Option<ActionStatus>,
    pub result: Option<ExecResult>,
    pub meta: Option<ActionMeta>,
    pub note: Option<String>,
}

impl ActionPatch {
    pub fn status(status: ActionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: ExecResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

/// Result of an atomic status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The action was in the expected status and now has the new one.
    Claimed(Action),
    /// The action exists but is in some other status; nothing changed.
    Unexpected(Action),
    Missing,
}

pub struct ActionStore {
    path: PathBuf,
    max_actions: usize,
    lock: Mutex<()>,
}

impl ActionStore {
    pub fn new(path: impl Into<PathBuf>, max_actions: usize) -> Self {
        Self {
            path: path.into(),
            max_actions: max_actions.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All actions, newest first.
    pub fn list(&self) -> Vec<Action> {
        let _guard = self.guard();
        self.load()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Action> {
        self.list().into_iter().find(|action| action.id == id)
    }

    /// Insert at the front, trimming the oldest entries beyond the cap.
    #[instrument(skip_all, fields(id = %action.id, kind = action.kind.type_name()))]
    pub fn add(&self, action: Action) -> Result<Action> {
        let _guard = self.guard();
        let mut actions = self.load();
        actions.retain(|existing| existing.id != action.id);
        actions.insert(0, action.clone());
        if actions.len() > self.max_actions {
            let dropped = actions.len() - self.max_actions;
            actions.truncate(self.max_actions);
            debug!(dropped, "trimmed action queue");
        }
        self.save(&actions)?;
        Ok(action)
    }

    /// Merge `patch` into the action with `id`; `None` when it does not exist.
    #[instrument(skip_all, fields(id = %id))]
    pub fn update(&self, id: &str, patch: ActionPatch) -> Result<Option<Action>> {
        let _guard = self.guard();
        let mut actions = self.load();
        let Some(action) = actions.iter_mut().find(|action| action.id == id) else {
            return Ok(None);
        };
        apply_patch(action, patch);
        let updated = action.clone();
        sort_newest_first(&mut actions);
        self.save(&actions)?;
        Ok(Some(updated))
    }

    /// Move `id` from `from` to `to` in one locked read-modify-write.
    #[instrument(skip_all, fields(id = %id, from = %from, to = %to))]
    pub fn claim(&self, id: &str, from: ActionStatus, to: ActionStatus) -> Result<Claim> {
        let _guard = self.guard();
        let mut actions = self.load();
        let Some(action) = actions.iter_mut().find(|action| action.id == id) else {
            return Ok(Claim::Missing);
        };
        if action.status != from {
            return Ok(Claim::Unexpected(action.clone()));
        }
        apply_patch(action, ActionPatch::status(to));
        let claimed = action.clone();
        sort_newest_first(&mut actions);
        self.save(&actions)?;
        Ok(Claim::Claimed(claimed))
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Vec<Action> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "unreadable action store; starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Array(records)) => sanitize_records(records, Utc::now()),
            Ok(_) => {
                warn!(path = %self.path.display(), "action store is not an array; starting empty");
                Vec::new()
            }
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "unparsable action store; starting empty");
                Vec::new()
            }
        }
    }

    fn save(&self, actions: &[Action]) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(actions).context("serialize actions")?;
        buf.push('\n');
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp actions {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace actions {}", self.path.display()))?;
        Ok(())
    }
}

fn apply_patch(action: &mut Action, patch: ActionPatch) {
    if let Some(status) = patch.status {
        action.status = status;
    }
    if let Some(result) = patch.result {
        action.result = Some(result);
    }
    if let Some(meta) = patch.meta {
        action.meta = meta;
    }
    if let Some(note) = patch.note {
        action.note = Some(note);
    }
    let now = Utc::now();
    // Keep updatedAt strictly increasing so the newest-first order is stable.
    action.updated_at = if now > action.updated_at {
        now
    } else {
        action.updated_at + chrono::Duration::milliseconds(1)
    };
}

fn sort_newest_first(actions: &mut [Action]) {
    actions.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// Repair or drop raw records, dedupe by id (newest wins) and sort.
pub fn sanitize_records(records: Vec<Value>, now: DateTime<Utc>) -> Vec<Action> {
    let mut by_id: HashMap<String, Action> = HashMap::new();
    for (index, record) in records.into_iter().enumerate() {
        let Value::Object(map) = record else {
            warn!(index, "dropping non-object action record");
            continue;
        };
        let Some(action) = sanitize_record(map, now, index) else {
            continue;
        };
        match by_id.get(&action.id) {
            Some(existing) if existing.updated_at >= action.updated_at => {
                debug!(id = %action.id, "dropping older duplicate action");
            }
            _ => {
                by_id.insert(action.id.clone(), action);
            }
        }
    }
    let mut actions: Vec<Action> = by_id.into_values().collect();
    sort_newest_first(&mut actions);
    actions
}

fn sanitize_record(mut map: Map<String, Value>, now: DateTime<Utc>, index: usize) -> Option<Action> {
    let id = match map.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        _ => {
            warn!(index, "dropping action record without a string id");
            return None;
        }
    };

    let mut tagged = Map::new();
    tagged.insert("type".to_string(), map.remove("type").unwrap_or(Value::Null));
    tagged.insert(
        "payload".to_string(),
        map.remove("payload").unwrap_or(Value::Null),
    );
    let kind = match ActionKind::from_json(Value::Object(tagged)) {
        Ok(kind) => kind,
        Err(err) => {
            warn!(id = %id, err = %err, "dropping action with undecodable type/payload");
            return None;
        }
    };

    let status = map
        .get("status")
        .cloned()
        .and_then(|value| serde_json::from_value::<ActionStatus>(value).ok())
        .unwrap_or(ActionStatus::Pending);

    let created = map.get("createdAt").and_then(parse_timestamp);
    let updated = map.get("updatedAt").and_then(parse_timestamp);
    let created_at = created.or(updated).unwrap_or(now);
    let updated_at = updated.or(created).unwrap_or(now);

    let result = map
        .remove("result")
        .filter(|value| !value.is_null())
        .and_then(|value| match serde_json::from_value::<ExecResult>(value) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(id = %id, err = %err, "discarding malformed action result");
                None
            }
        });

    let meta = map
        .remove("meta")
        .and_then(|value| serde_json::from_value::<ActionMeta>(value).ok())
        .unwrap_or_default();

    Some(Action {
        id,
        kind,
        title: string_field(&map, "title"),
        reason: string_field(&map, "reason"),
        status,
        created_at,
        updated_at,
        result,
        meta,
        note: map
            .get("note")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn string_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(num) => num.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}
