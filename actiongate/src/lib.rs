//! Approval-gated action pipeline for an agent that edits a local project.
//!
//! An oracle proposes abstract operations; the compiler turns them into at most
//! one deterministic, previewable action per planning pass; a human approves it;
//! the executor performs it with backups first. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (CSS/patch compilation, grounding,
//!   escalation, lifecycle). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (queue persistence, backups, command
//!   execution, search, the oracle process).
//!
//! Orchestration modules ([`gate`], [`turn`]) coordinate core logic with I/O to
//! implement CLI commands and the HTTP surface.

pub mod action;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod turn;
