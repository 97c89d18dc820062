//! Deterministic, pure logic shared by the action pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (file text, snapshots, plans) and return deterministic outputs suitable
//! for tests. Disk access goes through the [`types::FileLookup`] seam.

pub mod budget;
pub mod compiler;
pub mod css;
pub mod escalation;
pub mod grounding;
pub mod html;
pub mod lifecycle;
pub mod normalize;
pub mod patch;
pub mod path;
pub mod preview;
pub mod triage;
pub mod types;
