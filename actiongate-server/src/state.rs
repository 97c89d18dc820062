//! Shared application state for the gate server.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use actiongate::core::types::Intent;
use actiongate::gate::Gate;
use actiongate::io::oracle::PlanOracle;
use tokio::sync::{Notify, broadcast};

/// Events broadcast to SSE clients when gate files change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    ActionsChanged,
    BackupsChanged,
    ConfigChanged,
}

impl ChangeEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeEvent::ActionsChanged => "actions_changed",
            ChangeEvent::BackupsChanged => "backups_changed",
            ChangeEvent::ConfigChanged => "config_changed",
        }
    }
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<Gate>,
    pub oracle: Arc<dyn PlanOracle + Send + Sync>,
    /// Broadcast sender for file change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
    /// Notified once an approved `restart`/`off` asks the server to stop.
    pub shutdown: Arc<Notify>,
    last_intent: Arc<Mutex<Option<Intent>>>,
}

impl AppState {
    pub fn new(gate: Gate, oracle: Arc<dyn PlanOracle + Send + Sync>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            gate: Arc::new(gate),
            oracle,
            event_tx: Arc::new(event_tx),
            shutdown: Arc::new(Notify::new()),
            last_intent: Arc::new(Mutex::new(None)),
        }
    }

    pub fn last_intent(&self) -> Option<Intent> {
        *self
            .last_intent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_last_intent(&self, intent: Intent) {
        *self
            .last_intent
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(intent);
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.gate.config().server.shutdown_delay_ms)
    }

    /// Path to .actiongate/state/ directory.
    pub fn state_dir(&self) -> PathBuf {
        self.gate.paths().state_dir.clone()
    }

    /// Path to .actiongate/backups/ directory.
    pub fn backups_dir(&self) -> PathBuf {
        self.gate.paths().backups_dir.clone()
    }

    /// Path to actions.json.
    pub fn actions_path(&self) -> PathBuf {
        self.gate.paths().actions_path.clone()
    }

    /// Path to config.toml.
    pub fn config_path(&self) -> PathBuf {
        self.gate.paths().config_path.clone()
    }
}
