//! Approval-gated action queue CLI.
//!
//! Every command prints one JSON document on stdout. Diagnostics go to
//! stderr through `tracing` (`RUST_LOG`).

use std::path::{Path, PathBuf};

use actiongate::core::types::Intent;
use actiongate::error::GateError;
use actiongate::exit_codes;
use actiongate::gate::{Gate, NewAction};
use actiongate::io::init::{InitOptions, init_gate};
use actiongate::io::oracle::CommandOracle;
use actiongate::logging;
use actiongate::turn::run_turn;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Parser)]
#[command(
    name = "actiongate",
    version,
    about = "Approval-gated action queue for agent-proposed project changes"
)]
struct Cli {
    /// Project root containing `.actiongate/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Raise the default log level (`-v` info, `-vv` debug). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.actiongate/` scaffolding (config, schemas, empty queue).
    Init {
        /// Overwrite existing config and schema files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the action queue, newest first.
    List,
    /// Queue a pending action.
    Add {
        /// Action type, e.g. `write_file` or `run_cmd`.
        #[arg(long = "type")]
        kind_type: String,
        /// Payload as a JSON object.
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Approve and execute a pending action.
    Approve {
        id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Reject a pending action.
    Reject {
        id: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Restore the files a completed action changed.
    Rollback {
        id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the diff an action would apply.
    Preview { id: String },
    /// Print the grounding snapshot for a message.
    Snapshot { message: String },
    /// Run one planning turn for a message.
    Turn {
        message: String,
        /// Intent of the previous turn, if any.
        #[arg(long, value_parser = parse_intent)]
        last_intent: Option<Intent>,
    },
}

fn parse_intent(raw: &str) -> Result<Intent, String> {
    match raw {
        "chat" => Ok(Intent::Chat),
        "plan" => Ok(Intent::Plan),
        other => Err(format!("unknown intent {other:?} (expected chat or plan)")),
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::List => {
            let gate = Gate::open(root)?;
            print_json(&json!({"ok": true, "actions": gate.list()}))?;
            Ok(exit_codes::OK)
        }
        Command::Add {
            kind_type,
            payload,
            title,
            reason,
        } => cmd_add(root, kind_type, &payload, title, reason),
        Command::Approve { id, dry_run } => {
            let gate = Gate::open(root)?;
            let outcome = gate.approve(&id, dry_run)?;
            print_json(&outcome)?;
            Ok(if outcome.result.ok {
                exit_codes::OK
            } else {
                exit_codes::ACTION_FAILED
            })
        }
        Command::Reject { id, note } => {
            let gate = Gate::open(root)?;
            let action = gate.reject(&id, note)?;
            print_json(&json!({"ok": true, "action": action}))?;
            Ok(exit_codes::OK)
        }
        Command::Rollback { id, dry_run } => {
            let gate = Gate::open(root)?;
            print_json(&gate.rollback(&id, dry_run)?)?;
            Ok(exit_codes::OK)
        }
        Command::Preview { id } => {
            let gate = Gate::open(root)?;
            print_json(&gate.preview(&id)?)?;
            Ok(exit_codes::OK)
        }
        Command::Snapshot { message } => {
            let gate = Gate::open(root)?;
            print_json(&gate.snapshot(&message, None))?;
            Ok(exit_codes::OK)
        }
        Command::Turn {
            message,
            last_intent,
        } => {
            let gate = Gate::open(root)?;
            let config = gate.config();
            let oracle = CommandOracle::new(
                gate.paths().clone(),
                config.planner.clone(),
                config.grounding.clone(),
            );
            print_json(&run_turn(&gate, &oracle, &message, last_intent)?)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_gate(root, &InitOptions { force })?;
    print_json(&json!({"ok": true, "gateDir": paths.gate_dir}))?;
    Ok(exit_codes::OK)
}

fn cmd_add(
    root: &Path,
    kind_type: String,
    payload: &str,
    title: String,
    reason: String,
) -> Result<i32> {
    let payload: Value = serde_json::from_str(payload).context("parse --payload as JSON")?;
    let gate = Gate::open(root)?;
    let action = gate.add(NewAction {
        kind_type,
        payload,
        title,
        reason,
        ..NewAction::default()
    })?;
    print_json(&json!({"ok": true, "action": action}))?;
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<GateError>() {
        Some(GateError::NotFound(_)) => exit_codes::NOT_FOUND,
        Some(GateError::InvalidTransition { .. } | GateError::NothingToRollBack(_)) => {
            exit_codes::CONFLICT
        }
        _ => exit_codes::INVALID,
    }
}
