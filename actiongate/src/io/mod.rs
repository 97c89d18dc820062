//! I/O for the action pipeline: persistence, side effects, and the oracle.

pub mod backup;
pub mod config;
pub mod executor;
pub mod init;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod search;
pub mod snapshot;
pub mod store;
pub mod workspace;
