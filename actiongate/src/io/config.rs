//! Gate configuration stored under `.actiongate/state/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::compiler::CompilerConfig;
use crate::core::escalation::EscalationConfig;
use crate::core::path::normalize_relative;

/// Gate configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values the
/// server runs with out of the box.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    pub store: StoreConfig,
    pub executor: ExecutorConfig,
    pub grounding: GroundingConfig,
    pub search: SearchConfig,
    pub planner: PlannerConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Oldest actions beyond this count are trimmed on insert.
    pub max_actions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_actions: 200 }
    }
}

/// What `write_file` does when the target already has identical content.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdenticalWrite {
    #[default]
    Reject,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Default wall-clock limit for `run_cmd`.
    pub command_timeout_secs: u64,
    /// Per-stream cap on captured command output.
    pub output_limit_bytes: usize,
    /// Shell prefix; the command string is appended as the last argument.
    pub shell: Vec<String>,
    pub identical_write: IdenticalWrite,
    /// Backups kept on disk; oldest are pruned first.
    pub backup_retention: usize,
    /// Capacity of the in-memory executed-id cache.
    pub executed_cache: usize,
    pub snippet_max_bytes: usize,
    /// Program used by `open_path`; platform default when unset.
    pub opener: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 12,
            output_limit_bytes: 64 * 1024,
            shell: vec!["sh".to_string(), "-c".to_string()],
            identical_write: IdenticalWrite::Reject,
            backup_retention: 200,
            executed_cache: 1024,
            snippet_max_bytes: 16 * 1024,
            opener: None,
        }
    }
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn opener(&self) -> &str {
        match &self.opener {
            Some(opener) => opener,
            None if cfg!(target_os = "macos") => "open",
            None => "xdg-open",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GroundingConfig {
    /// Project-relative files read into every snapshot.
    pub files: Vec<String>,
    pub max_file_bytes: usize,
    /// Lines read on either side of a search hit.
    pub snippet_radius: usize,
    pub stylesheet: String,
    pub html: String,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            files: vec![
                "public/index.html".to_string(),
                "public/styles.css".to_string(),
                "public/app.js".to_string(),
            ],
            max_file_bytes: 32 * 1024,
            snippet_radius: 20,
            stylesheet: "public/styles.css".to_string(),
            html: "public/index.html".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
    /// Directory names never descended into.
    pub exclude_dirs: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 40,
            max_file_bytes: 256 * 1024,
            exclude_dirs: [".git", "node_modules", "target", ".actiongate"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Read-only inspections run without approval per turn.
    pub max_auto_passes: u32,
    /// Agent command; schema, output and `-` (prompt on stdin) are appended.
    pub oracle_command: Vec<String>,
    pub oracle_timeout_secs: u64,
    /// Extra attempts after a failed oracle call.
    pub oracle_retries: u32,
    pub oracle_output_limit_bytes: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_auto_passes: 2,
            oracle_command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
            ],
            oracle_timeout_secs: 120,
            oracle_retries: 1,
            oracle_output_limit_bytes: 100_000,
        }
    }
}

impl PlannerConfig {
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Delay between answering a restart/off approval and shutting down.
    pub shutdown_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_delay_ms: 800,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.store.max_actions == 0 {
            return Err(anyhow!("store.max_actions must be > 0"));
        }
        if self.executor.command_timeout_secs == 0 {
            return Err(anyhow!("executor.command_timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        if self.executor.shell.is_empty() || self.executor.shell[0].trim().is_empty() {
            return Err(anyhow!("executor.shell must be a non-empty array"));
        }
        if self.executor.backup_retention == 0 {
            return Err(anyhow!("executor.backup_retention must be > 0"));
        }
        if self.executor.executed_cache == 0 {
            return Err(anyhow!("executor.executed_cache must be > 0"));
        }
        if self.grounding.max_file_bytes == 0 {
            return Err(anyhow!("grounding.max_file_bytes must be > 0"));
        }
        for file in self
            .grounding
            .files
            .iter()
            .chain([&self.grounding.stylesheet, &self.grounding.html])
        {
            normalize_relative(file)
                .map_err(|err| anyhow!("grounding path {file:?} is invalid: {err}"))?;
        }
        if self.search.max_results == 0 {
            return Err(anyhow!("search.max_results must be > 0"));
        }
        if self.planner.oracle_command.is_empty() || self.planner.oracle_command[0].trim().is_empty()
        {
            return Err(anyhow!("planner.oracle_command must be a non-empty array"));
        }
        if self.planner.oracle_timeout_secs == 0 {
            return Err(anyhow!("planner.oracle_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn compiler(&self) -> CompilerConfig {
        CompilerConfig {
            default_stylesheet: self.grounding.stylesheet.clone(),
            default_html: self.grounding.html.clone(),
            escalation: EscalationConfig {
                max_results: self.search.max_results,
                snippet_radius: self.grounding.snippet_radius,
            },
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GateConfig::default()`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    if !path.exists() {
        let cfg = GateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GateConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = GateConfig::default();
        cfg.executor.identical_write = IdenticalWrite::Skip;
        cfg.executor.opener = Some("firefox".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[executor]\ncommand_timeout_secs = 30\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.executor.command_timeout_secs, 30);
        assert_eq!(cfg.executor.output_limit_bytes, 64 * 1024);
        assert_eq!(cfg.planner.max_auto_passes, 2);
    }

    #[test]
    fn escaping_grounding_paths_are_rejected() {
        let mut cfg = GateConfig::default();
        cfg.grounding.files.push("../secrets.txt".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("grounding path"));
    }
}
