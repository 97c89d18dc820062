//! Test-only helpers: scripted oracles and sandboxed project fixtures.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{Intent, Plan, Snapshot};
use crate::error::OracleError;
use crate::gate::Gate;
use crate::io::oracle::{PlanOracle, PlanRequest, sanitize_plan};

pub const INDEX_HTML: &str = "<!doctype html>\n<html>\n<head>\n  <title>Demo</title>\n  <link rel=\"stylesheet\" href=\"styles.css\">\n</head>\n<body>\n  <div id=\"hero\" class=\"banner\">Hello</div>\n  <button class=\"btn\">Go</button>\n</body>\n</html>\n";
pub const STYLES_CSS: &str = "body { margin: 0; }\n\n.btn { color: red; background: white; }\n";

/// One scripted oracle response to `plan`.
#[derive(Debug, Clone)]
pub enum ScriptedPlan {
    Plan(Plan),
    Fail,
}

/// Oracle returning canned answers in order. Every plan request's snapshot is
/// recorded for assertions.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    intent: Option<Intent>,
    chat_reply: Option<String>,
    plans: Mutex<VecDeque<ScriptedPlan>>,
    snapshots: Mutex<Vec<Snapshot>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_chat(mut self, reply: &str) -> Self {
        self.chat_reply = Some(reply.to_string());
        self
    }

    pub fn with_plan(self, plan: Plan) -> Self {
        self.push(ScriptedPlan::Plan(plan));
        self
    }

    /// Queue a plan given as raw oracle JSON; it goes through sanitization.
    pub fn with_plan_json(self, value: Value) -> Self {
        let plan = sanitize_plan(value).expect("scripted plan should sanitize");
        self.with_plan(plan)
    }

    pub fn with_failure(self) -> Self {
        self.push(ScriptedPlan::Fail);
        self
    }

    /// Snapshots seen by `plan`, in call order.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, plan: ScriptedPlan) {
        self.plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(plan);
    }
}

impl PlanOracle for ScriptedOracle {
    fn triage(&self, _turn_id: &str, _message: &str) -> Result<Intent, OracleError> {
        self.intent
            .ok_or_else(|| OracleError::Failed("no scripted intent".to_string()))
    }

    fn chat(&self, _turn_id: &str, _message: &str) -> Result<String, OracleError> {
        self.chat_reply
            .clone()
            .ok_or_else(|| OracleError::Failed("no scripted chat reply".to_string()))
    }

    fn plan(&self, request: &PlanRequest<'_>) -> Result<Plan, OracleError> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.snapshot.clone());
        let next = self
            .plans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(ScriptedPlan::Plan(plan)) => Ok(plan),
            Some(ScriptedPlan::Fail) => Err(OracleError::Failed("scripted failure".to_string())),
            None => Err(OracleError::Failed("no scripted plan left".to_string())),
        }
    }
}

/// Temp project with `public/index.html` and `public/styles.css`, plus an
/// open gate.
pub struct TestProject {
    pub temp: TempDir,
    pub gate: Gate,
}

impl TestProject {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("public")).expect("mkdir public");
        fs::write(temp.path().join("public/index.html"), INDEX_HTML).expect("write html");
        fs::write(temp.path().join("public/styles.css"), STYLES_CSS).expect("write css");
        let gate = Gate::open(temp.path()).expect("open gate");
        Self { temp, gate }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).expect("read project file")
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir parent");
        }
        fs::write(path, contents).expect("write project file");
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
