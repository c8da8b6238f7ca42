//! CLI surface: argument types and the interactive run modes

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::events::WorkflowEvent;
use crate::negotiation::{evaluate_counter, CounterDecision};
use crate::workflow::{Collaborators, WorkflowExecutor};

#[derive(Parser)]
#[command(name = "reflip", about = "Approval-gated resale automation engine", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive one command through the full workflow (dry-run by default)
    Run {
        /// Natural-language command, e.g. "buy 2 mechanical keyboards under $500 and resell"
        text: String,
        /// Persist to the configured database instead of running dry
        #[arg(long)]
        live: bool,
        /// Approve every gate automatically (demo mode)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Parse a command and print the structured parameters
    Parse {
        text: String,
    },
    /// Evaluate one counter-offer step
    Counter {
        /// Seller's counter price
        their: Decimal,
        /// Our current offer
        our: Decimal,
        /// Maximum acceptable price
        max: Decimal,
        /// Current round number
        #[arg(default_value_t = 1)]
        round: u32,
        /// Strategy round limit
        #[arg(long, default_value_t = 3)]
        max_rounds: u32,
    },
}

/// Run a single command end to end, printing events as they happen
pub async fn run_command_mode(text: &str, dry_run: bool, auto_approve: bool) -> Result<()> {
    let config = AppConfig::load().unwrap_or_else(|_| AppConfig::default_config(dry_run));

    let store = if config.database.disabled || dry_run {
        None
    } else {
        let store = crate::persistence::WorkflowStore::new(
            &config.database.url,
            config.database.max_connections,
        )
        .await?;
        store.migrate().await?;
        Some(std::sync::Arc::new(store))
    };

    let executor = WorkflowExecutor::new(&config, Collaborators::simulated(), store).await;

    if auto_approve {
        spawn_auto_approver(executor.clone());
    }
    spawn_simulated_seller(executor.clone());

    let mut events = executor.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("  [{}]", event.kind());
        }
    });

    let command_id = executor.submit_command(text).await?;
    println!("command {command_id} submitted");

    let status = tokio::select! {
        status = executor.await_command(command_id) => status?,
        _ = tokio::signal::ctrl_c() => {
            println!("interrupt received, cancelling command");
            executor.cancel_command(command_id).await?;
            executor.await_command(command_id).await?
        }
    };
    let command = executor.command_status(command_id).await?;
    println!(
        "command {command_id} finished: {status} (found {}, purchased {}, listed {})",
        command.items_found, command.items_purchased, command.items_listed
    );
    if let Some(reason) = command.failure_reason {
        println!("  reason: {reason}");
    }
    if let Some(budget_id) = command.budget_id {
        println!("  budget: {}", executor.budget_summary(budget_id).await?);
    }

    executor.shutdown().await;
    printer.abort();
    Ok(())
}

/// Demo helper: rubber-stamp every gate
fn spawn_auto_approver(executor: WorkflowExecutor) {
    let mut events = executor.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let WorkflowEvent::ApprovalRequested {
                approval_id, kind, ..
            } = event
            {
                info!(approval_id = %approval_id, kind = %kind, "auto-approving");
                if let Err(e) = executor
                    .resolve_approval(approval_id, true, "auto-approver", None)
                    .await
                {
                    warn!(approval_id = %approval_id, error = %e, "auto-approve failed");
                }
            }
        }
    });
}

/// Demo helper: a scripted seller that counters once, then takes the deal
fn spawn_simulated_seller(executor: WorkflowExecutor) {
    let mut events = executor.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkflowEvent::NegotiationStarted {
                    thread_id,
                    opening_offer,
                    ..
                } => {
                    let counter = (opening_offer * Decimal::new(12, 1)).round_dp(2); // +20%
                    let engine = executor.engine().clone();
                    let _ = engine
                        .handle_inbound(thread_id, &format!("I could do ${counter}"), None)
                        .await;
                }
                WorkflowEvent::NegotiationUpdated {
                    thread_id, status, ..
                } if !status.is_terminal() => {
                    let engine = executor.engine().clone();
                    let _ = engine
                        .handle_inbound(thread_id, "ok deal, it's yours", None)
                        .await;
                }
                _ => {}
            }
        }
    });
}

/// One-shot parser check
pub async fn parse_mode(text: &str) -> Result<()> {
    use crate::adapters::{CommandParser, SimulatedParser};
    let parsed = SimulatedParser.parse(text).await?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

/// Print one counter-offer evaluation
pub fn counter_mode(their: Decimal, our: Decimal, max: Decimal, round: u32, max_rounds: u32) {
    match evaluate_counter(their, our, max, round, max_rounds) {
        CounterDecision::Accept { final_price } => {
            println!("accept at ${final_price}");
        }
        CounterDecision::Counter { new_offer } => {
            println!("counter at ${new_offer}");
        }
        CounterDecision::FinalOffer { offer } => {
            println!("final offer, hold at ${offer}");
        }
    }
}
