//! Action status transitions.
//!
//! - `pending` -> `running` | `rejected`
//! - `running` -> `done` | `failed`
//! - `done` | `failed` -> `rolled_back`
//!
//! A failed bundle may have applied some steps before the one that failed,
//! so it can be rolled back like a completed action. Everything else is
//! refused.

use crate::action::ActionStatus;

pub fn can_transition(from: ActionStatus, to: ActionStatus) -> bool {
    use ActionStatus::{Done, Failed, Pending, Rejected, RolledBack, Running};
    matches!(
        (from, to),
        (Pending, Running) | (Pending, Rejected) | (Running, Done) | (Running, Failed)
            | (Done, RolledBack) | (Failed, RolledBack)
    )
}

/// Status recorded after execution.
pub fn status_after_run(ok: bool) -> ActionStatus {
    if ok {
        ActionStatus::Done
    } else {
        ActionStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_may_start_running() {
        for status in [
            ActionStatus::Running,
            ActionStatus::Done,
            ActionStatus::Failed,
            ActionStatus::Rejected,
            ActionStatus::RolledBack,
        ] {
            assert!(!can_transition(status, ActionStatus::Running), "{status}");
        }
        assert!(can_transition(ActionStatus::Pending, ActionStatus::Running));
    }

    #[test]
    fn executed_actions_may_roll_back() {
        assert!(can_transition(ActionStatus::Done, ActionStatus::RolledBack));
        assert!(can_transition(ActionStatus::Failed, ActionStatus::RolledBack));
        for status in [
            ActionStatus::Pending,
            ActionStatus::Running,
            ActionStatus::Rejected,
            ActionStatus::RolledBack,
        ] {
            assert!(!can_transition(status, ActionStatus::RolledBack), "{status}");
        }
    }
}
