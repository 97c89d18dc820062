//! Server-Sent Events stream and file watcher.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Serialize)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: &'static str,
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    let payload = SsePayload { event_type: change_event.as_str() };
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Start the file watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(100)),
    )?;

    for dir in [state.state_dir(), state.backups_dir()] {
        if dir.exists() {
            watcher.watch(&dir, RecursiveMode::Recursive)?;
            info!(path = %dir.display(), "watching directory");
        }
    }

    // Batch on a fixed tick so an action write and its backup coalesce.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(100));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events);
                pending_events.clear();
            }
        }
    }
}

fn process_events(state: &AppState, events: &[NotifyEvent]) {
    let actions_path = state.actions_path();
    let config_path = state.config_path();
    let backups_dir = state.backups_dir();

    let mut changed: Vec<ChangeEvent> = Vec::new();
    for event in events {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            continue;
        }

        for path in &event.paths {
            let change = if path == &actions_path {
                ChangeEvent::ActionsChanged
            } else if path == &config_path {
                ChangeEvent::ConfigChanged
            } else if path.starts_with(&backups_dir) {
                ChangeEvent::BackupsChanged
            } else {
                continue;
            };
            if !changed.contains(&change) {
                changed.push(change);
            }
        }
    }

    for change in changed {
        debug!(event = change.as_str(), "broadcasting change");
        let _ = state.event_tx.send(change);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use actiongate::gate::Gate;
    use actiongate::test_support::ScriptedOracle;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    use super::*;

    fn event(kind: EventKind, path: PathBuf) -> NotifyEvent {
        NotifyEvent {
            kind,
            paths: vec![path],
            attrs: Default::default(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ChangeEvent>) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn open_state(temp: &tempfile::TempDir) -> AppState {
        let gate = Gate::open(temp.path()).expect("gate");
        AppState::new(gate, Arc::new(ScriptedOracle::new()))
    }

    #[test]
    fn action_writes_and_backups_emit_one_event_each() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = open_state(&temp);
        let mut rx = state.event_tx.subscribe();

        let modify = EventKind::Modify(ModifyKind::Any);
        process_events(
            &state,
            &[
                event(modify, state.actions_path()),
                event(modify, state.actions_path()),
                event(
                    EventKind::Create(CreateKind::File),
                    state.backups_dir().join("1700000000000-styles.css.bak"),
                ),
            ],
        );

        assert_eq!(
            drain(&mut rx),
            vec![ChangeEvent::ActionsChanged, ChangeEvent::BackupsChanged]
        );
    }

    #[test]
    fn pruned_backups_and_config_edits_are_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = open_state(&temp);
        let mut rx = state.event_tx.subscribe();

        process_events(
            &state,
            &[
                event(
                    EventKind::Remove(RemoveKind::File),
                    state.backups_dir().join("old.bak"),
                ),
                event(EventKind::Modify(ModifyKind::Any), state.config_path()),
            ],
        );

        assert_eq!(
            drain(&mut rx),
            vec![ChangeEvent::BackupsChanged, ChangeEvent::ConfigChanged]
        );
    }

    #[test]
    fn unrelated_paths_and_access_events_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = open_state(&temp);
        let mut rx = state.event_tx.subscribe();

        process_events(
            &state,
            &[
                event(
                    EventKind::Modify(ModifyKind::Any),
                    state.state_dir().join("actions.json.tmp"),
                ),
                event(
                    EventKind::Access(notify::event::AccessKind::Any),
                    state.actions_path(),
                ),
            ],
        );

        assert!(drain(&mut rx).is_empty());
    }
}
