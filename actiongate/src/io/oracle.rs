//! Language-model oracle seam.
//!
//! The [`PlanOracle`] trait decouples the turn loop from the agent backend
//! (by default `codex exec`). Tests use scripted oracles that return canned
//! plans without spawning processes. Oracle output is untrusted: plans are
//! sanitized op by op before the compiler sees them.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Instant;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::attempt_timeout;
use crate::core::types::{Intent, Plan, PlanOp, Snapshot};
use crate::error::OracleError;
use crate::io::config::{GroundingConfig, PlannerConfig};
use crate::io::init::{GatePaths, PLAN_OP_SCHEMA};
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::prompt::PromptEngine;

static OP_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PLAN_OP_SCHEMA).map_err(|err| err.to_string())?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| err.to_string())
});

/// One planning call within a turn.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub snapshot: &'a Snapshot,
    pub turn_id: &'a str,
    /// 0 for the first plan of a turn, then one per automatic inspection.
    pub pass: u32,
}

/// Abstraction over the language model.
pub trait PlanOracle {
    fn triage(&self, turn_id: &str, message: &str) -> Result<Intent, OracleError>;
    fn chat(&self, turn_id: &str, message: &str) -> Result<String, OracleError>;
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Plan, OracleError>;
}

/// Oracle that spawns the configured agent command with a rendered prompt on
/// stdin, an output schema and an output file.
pub struct CommandOracle {
    paths: GatePaths,
    planner: PlannerConfig,
    grounding: GroundingConfig,
    prompts: PromptEngine,
}

impl CommandOracle {
    pub fn new(paths: GatePaths, planner: PlannerConfig, grounding: GroundingConfig) -> Self {
        Self {
            paths,
            planner,
            grounding,
            prompts: PromptEngine::new(),
        }
    }

    /// Run the agent with retries and return its parsed output JSON.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    fn call(&self, dir: &Path, prompt: &str, schema_path: &Path) -> Result<Value, OracleError> {
        fs::create_dir_all(dir)
            .map_err(|err| OracleError::Failed(format!("create {}: {err}", dir.display())))?;
        fs::write(dir.join("prompt.md"), prompt)
            .map_err(|err| OracleError::Failed(format!("write prompt: {err}")))?;
        if !schema_path.exists() {
            return Err(OracleError::Failed(format!(
                "missing output schema {}",
                schema_path.display()
            )));
        }

        let per_call = self.planner.oracle_timeout();
        let attempts = self.planner.oracle_retries + 1;
        let deadline = Instant::now() + per_call * attempts;
        let output_path = dir.join("output.json");
        let mut last_err = OracleError::Failed("oracle was not attempted".to_string());

        for attempt in 1..=attempts {
            let Some(timeout) = attempt_timeout(per_call, deadline) else {
                break;
            };
            let _ = fs::remove_file(&output_path);
            info!(attempt, "calling oracle");
            match self.run_once(dir, prompt, schema_path, &output_path, timeout) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(attempt, err = %err, "oracle attempt failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    fn run_once(
        &self,
        dir: &Path,
        prompt: &str,
        schema_path: &Path,
        output_path: &Path,
        timeout: std::time::Duration,
    ) -> Result<Value, OracleError> {
        let (program, args) = self
            .planner
            .oracle_command
            .split_first()
            .ok_or_else(|| OracleError::Failed("oracle command is empty".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg("--output-schema")
            .arg(schema_path)
            .arg("--output-last-message")
            .arg(output_path)
            .arg("-")
            .current_dir(&self.paths.root);

        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            timeout,
            self.planner.oracle_output_limit_bytes,
        )
        .map_err(|err| OracleError::Failed(format!("{err:#}")))?;
        write_oracle_log(&dir.join("oracle.log"), &output);

        if output.timed_out {
            return Err(OracleError::Timeout(timeout));
        }
        if !output.status.success() {
            return Err(OracleError::Failed(format!(
                "agent exited with status {:?}",
                output.status.code()
            )));
        }
        let contents = fs::read_to_string(output_path).map_err(|err| {
            OracleError::Failed(format!("missing oracle output {}: {err}", output_path.display()))
        })?;
        debug!(bytes = contents.len(), "oracle output read");
        parse_json_output(&contents)
    }
}

impl PlanOracle for CommandOracle {
    fn triage(&self, turn_id: &str, message: &str) -> Result<Intent, OracleError> {
        let prompt = self
            .prompts
            .render_triage(message)
            .map_err(|err| OracleError::Failed(format!("render triage prompt: {err:#}")))?;
        let dir = self.paths.turns_dir.join(turn_id).join("triage");
        let value = self.call(&dir, &prompt, &self.paths.triage_schema_path)?;
        match value.get("intent").and_then(Value::as_str) {
            Some("plan") => Ok(Intent::Plan),
            Some("chat") => Ok(Intent::Chat),
            other => Err(OracleError::Unparsable(format!("unknown intent {other:?}"))),
        }
    }

    fn chat(&self, turn_id: &str, message: &str) -> Result<String, OracleError> {
        let prompt = self
            .prompts
            .render_chat(message)
            .map_err(|err| OracleError::Failed(format!("render chat prompt: {err:#}")))?;
        let dir = self.paths.turns_dir.join(turn_id).join("chat");
        let value = self.call(&dir, &prompt, &self.paths.chat_schema_path)?;
        value
            .get("reply")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OracleError::Unparsable("chat output has no reply".to_string()))
    }

    #[instrument(skip_all, fields(turn_id = request.turn_id, pass = request.pass))]
    fn plan(&self, request: &PlanRequest<'_>) -> Result<Plan, OracleError> {
        let prompt = self
            .prompts
            .render_planner(
                request.snapshot,
                request.pass,
                &self.grounding.stylesheet,
                &self.grounding.html,
            )
            .map_err(|err| OracleError::Failed(format!("render planner prompt: {err:#}")))?;
        let dir: PathBuf = self.paths.turn_pass_dir(request.turn_id, request.pass);
        let value = self.call(&dir, &prompt, &self.paths.plan_schema_path)?;
        sanitize_plan(value)
    }
}

/// Parse agent output, tolerating a fenced ```json block around the object.
pub fn parse_json_output(contents: &str) -> Result<Value, OracleError> {
    let trimmed = contents.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|err| OracleError::Unparsable(err.to_string()))
}

/// Turn raw oracle JSON into a [`Plan`], dropping ops that fail the op schema
/// or do not decode.
pub fn sanitize_plan(value: Value) -> Result<Plan, OracleError> {
    let Value::Object(map) = value else {
        return Err(OracleError::Unparsable("plan must be a JSON object".to_string()));
    };
    let validator = OP_VALIDATOR
        .as_ref()
        .map_err(|err| OracleError::Failed(format!("invalid op schema: {err}")))?;

    let reply = map
        .get("reply")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let requires_approval = map
        .get("requiresApproval")
        .or_else(|| map.get("requires_approval"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut ops = Vec::new();
    let raw_ops = match map.get("ops") {
        Some(Value::Array(raw)) => raw.as_slice(),
        Some(_) => {
            warn!("plan ops is not an array; ignoring");
            &[]
        }
        None => &[],
    };
    for (index, raw) in raw_ops.iter().enumerate() {
        let errors: Vec<String> = validator.iter_errors(raw).map(|e| e.to_string()).collect();
        if !errors.is_empty() {
            warn!(index, errors = %errors.join("; "), "dropping op that fails schema");
            continue;
        }
        match serde_json::from_value::<PlanOp>(raw.clone()) {
            Ok(op) => ops.push(op),
            Err(err) => warn!(index, err = %err, "dropping undecodable op"),
        }
    }

    Ok(Plan {
        reply,
        requires_approval,
        ops,
    })
}

fn write_oracle_log(path: &Path, output: &CommandOutput) {
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout.lossy());
    buf.push_str(&output.stdout.notice("oracle stdout"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr.lossy());
    buf.push_str(&output.stderr.notice("oracle stderr"));
    if output.timed_out {
        buf.push_str("\n[oracle timed out]\n");
    }
    if let Err(err) = fs::write(path, buf) {
        warn!(path = %path.display(), err = %err, "failed to write oracle log");
    }
}
