//! Stable exit codes for actiongate CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid input, layout, config or other errors.
pub const INVALID: i32 = 1;
/// The named action does not exist.
pub const NOT_FOUND: i32 = 2;
/// The action is in a status that does not allow the operation.
pub const CONFLICT: i32 = 3;
/// The action ran and failed.
pub const ACTION_FAILED: i32 = 4;
