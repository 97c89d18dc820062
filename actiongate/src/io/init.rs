//! Initialization helpers for `.actiongate/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use super::config::{GateConfig, write_config};
use crate::core::path::GATE_DIR;

pub const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/oracle/plan.schema.json"
));
pub const PLAN_OP_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/oracle/plan_op.schema.json"
));
pub const TRIAGE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/oracle/triage.schema.json"
));
pub const CHAT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/oracle/chat.schema.json"
));

/// All canonical paths within `.actiongate/` for a project root.
#[derive(Debug, Clone)]
pub struct GatePaths {
    pub root: PathBuf,
    pub gate_dir: PathBuf,
    pub state_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub turns_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub off_path: PathBuf,
    pub actions_path: PathBuf,
    pub config_path: PathBuf,
    pub plan_schema_path: PathBuf,
    pub triage_schema_path: PathBuf,
    pub chat_schema_path: PathBuf,
}

impl GatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let gate_dir = root.join(GATE_DIR);
        let state_dir = gate_dir.join("state");
        Self {
            root: root.clone(),
            gate_dir: gate_dir.clone(),
            state_dir: state_dir.clone(),
            backups_dir: gate_dir.join("backups"),
            turns_dir: gate_dir.join("turns"),
            gitignore_path: gate_dir.join(".gitignore"),
            off_path: gate_dir.join("OFF"),
            actions_path: state_dir.join("actions.json"),
            config_path: state_dir.join("config.toml"),
            plan_schema_path: state_dir.join("plan.schema.json"),
            triage_schema_path: state_dir.join("triage.schema.json"),
            chat_schema_path: state_dir.join("chat.schema.json"),
        }
    }

    /// Directory for one oracle pass of a turn.
    pub fn turn_pass_dir(&self, turn_id: &str, pass: u32) -> PathBuf {
        self.turns_dir.join(turn_id).join(pass.to_string())
    }
}

/// Options for `init_gate`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing gate-owned files.
    pub force: bool,
}

/// Create `.actiongate/` scaffolding in `root`.
///
/// Fails if `.actiongate/` already exists unless `options.force` is set. A
/// forced init rewrites config and schemas but keeps the action queue and
/// backups.
pub fn init_gate(root: &Path, options: &InitOptions) -> Result<GatePaths> {
    let paths = GatePaths::new(root);
    if paths.gate_dir.exists() && !options.force {
        return Err(anyhow!(
            "actiongate init: {GATE_DIR} already exists (use --force to overwrite)"
        ));
    }
    if paths.gate_dir.exists() && !paths.gate_dir.is_dir() {
        return Err(anyhow!(
            "actiongate init: {GATE_DIR} exists but is not a directory"
        ));
    }

    create_layout(&paths)?;
    write_file(&paths.gitignore_path, GATE_GITIGNORE)?;
    write_config(&paths.config_path, &GateConfig::default())?;
    write_schemas(&paths)?;
    if !paths.actions_path.exists() {
        write_file(&paths.actions_path, EMPTY_QUEUE)?;
    }

    Ok(paths)
}

/// Create any missing directories and schema files without touching
/// existing content. Used when a server or CLI opens an uninitialized root.
pub fn ensure_layout(root: &Path) -> Result<GatePaths> {
    let paths = GatePaths::new(root);
    if paths.gate_dir.exists() && !paths.gate_dir.is_dir() {
        return Err(anyhow!("{} is not a directory", paths.gate_dir.display()));
    }
    create_layout(&paths)?;
    if !paths.gitignore_path.exists() {
        write_file(&paths.gitignore_path, GATE_GITIGNORE)?;
    }
    write_schemas(&paths)?;
    debug!(gate_dir = %paths.gate_dir.display(), "gate layout ready");
    Ok(paths)
}

fn create_layout(paths: &GatePaths) -> Result<()> {
    create_dir(&paths.gate_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.backups_dir)?;
    create_dir(&paths.turns_dir)
}

/// Schemas are owned by the binary; always refreshed.
fn write_schemas(paths: &GatePaths) -> Result<()> {
    write_file(&paths.plan_schema_path, PLAN_SCHEMA)?;
    write_file(&paths.triage_schema_path, TRIAGE_SCHEMA)?;
    write_file(&paths.chat_schema_path, CHAT_SCHEMA)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const GATE_GITIGNORE: &str = "backups/\nturns/\n";
const EMPTY_QUEUE: &str = "[]\n";

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_to_string(path: &Path) -> String {
        fs::read_to_string(path).expect("read file")
    }

    /// Verifies init_gate creates the complete directory structure and files.
    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_gate(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.gate_dir.is_dir());
        assert!(paths.state_dir.is_dir());
        assert!(paths.backups_dir.is_dir());
        assert!(paths.turns_dir.is_dir());
        assert!(paths.config_path.is_file());
        assert!(paths.plan_schema_path.is_file());
        assert!(paths.triage_schema_path.is_file());
        assert!(paths.chat_schema_path.is_file());
        assert_eq!(read_to_string(&paths.actions_path), EMPTY_QUEUE);
        assert_eq!(read_to_string(&paths.gitignore_path), GATE_GITIGNORE);
    }

    /// Verifies init_gate refuses to overwrite without --force.
    #[test]
    fn init_without_force_refuses_existing_gate_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_gate(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_gate(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    /// Verifies a forced init resets config but keeps the queue.
    #[test]
    fn init_with_force_keeps_actions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_gate(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.actions_path, "[{\"id\":\"a\"}]").expect("write queue");
        fs::write(&paths.config_path, "garbage = [").expect("write config");

        init_gate(temp.path(), &InitOptions { force: true }).expect("re-init");

        assert_eq!(read_to_string(&paths.actions_path), "[{\"id\":\"a\"}]");
        assert!(read_to_string(&paths.config_path).contains("[executor]"));
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ensure_layout(temp.path()).expect("first");
        ensure_layout(temp.path()).expect("second");
        assert!(paths.backups_dir.is_dir());
        assert!(!paths.actions_path.exists());
    }
}
