//! Diagnostics for the actiongate CLI.
//!
//! Tracing goes to stderr so stdout stays a single JSON document. Oracle
//! transcripts are a separate concern: `io::oracle` always writes them under
//! `.actiongate/turns/`, whatever the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "warn,actiongate=info",
        _ => "info,actiongate=debug",
    }
}

/// Install the stderr subscriber.
///
/// ```bash
/// RUST_LOG=actiongate::io::executor=debug actiongate approve <id>
/// ```
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
