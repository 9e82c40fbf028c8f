//! Toolroom command-line client.
//!
//! Talks to the movement store configured by `--config`, `TOOLROOM_CONFIG` or
//! `TOOLROOM_API_URL` and prints results as pretty JSON. Failures are printed
//! to stderr in the same shape a form or notification would show them.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use toolroom_client::{init_tracing, ClientConfig, Feedback, MovementLedger, TelemetryConfig};
use toolroom_core::{
    parse_timestamp, CheckoutDraft, CheckoutRecord, Condition, EntityId, EntityKind, ListQuery,
    Page, ReturnDraft, ReturnRecord, ReviewOutcome, Timestamp, ToolInstance, ToolroomResult,
    ValidationError, DEFAULT_PAGE_SIZE,
};
use toolroom_lifecycle::InstanceStatus;
use tracing::warn;

#[derive(Parser)]
#[command(name = "toolroom")]
#[command(about = "Check tool instances in and out of the toolroom")]
#[command(version)]
struct Cli {
    /// TOML config file (overrides TOOLROOM_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the derived state of an instance
    State { instance_id: EntityId },

    /// List instances, checkouts or returns
    List {
        kind: EntityKind,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
        #[arg(long)]
        search: Option<String>,
        /// Only movements of this instance
        #[arg(long)]
        instance: Option<EntityId>,
    },

    /// Check an instance out to an employee
    Checkout {
        instance_id: EntityId,
        employee_id: EntityId,
        #[arg(long)]
        purpose: String,
        #[arg(long)]
        site: String,
        #[arg(long)]
        order: EntityId,
        #[arg(long, default_value = "good")]
        condition: Condition,
        #[arg(long)]
        comment: Option<String>,
        /// Checkout time, defaults to now
        #[arg(long, value_parser = parse_at)]
        at: Option<Timestamp>,
    },

    /// Return an instance held by an employee
    Return {
        instance_id: EntityId,
        employee_id: EntityId,
        #[arg(long)]
        condition: Condition,
        #[arg(long)]
        comment: Option<String>,
        /// Return time, defaults to now
        #[arg(long, value_parser = parse_at)]
        at: Option<Timestamp>,
    },

    /// Close the review of a damaged instance
    Resolve {
        instance_id: EntityId,
        outcome: ReviewOutcome,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum Output {
    Status(InstanceStatus),
    Instances(Page<ToolInstance>),
    Checkouts(Page<CheckoutRecord>),
    Returns(Page<ReturnRecord>),
    Instance(ToolInstance),
    Checkout(CheckoutRecord),
    Return(ReturnRecord),
}

fn parse_at(raw: &str) -> Result<Timestamp, ValidationError> {
    parse_timestamp("at", raw)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(&TelemetryConfig::default())?;

    let config = ClientConfig::resolve(cli.config)?;
    let ledger = MovementLedger::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    match run(cli.command, &ledger, &cancel).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", serde_json::to_string_pretty(&Feedback::for_error(&err))?);
            Err(Report::new(err))
        }
    }
}

async fn run(
    command: Command,
    ledger: &MovementLedger,
    cancel: &CancellationToken,
) -> ToolroomResult<Output> {
    match command {
        Command::State { instance_id } => {
            Ok(Output::Status(ledger.instance_status(&instance_id, cancel).await?))
        }
        Command::List {
            kind,
            page,
            page_size,
            search,
            instance,
        } => {
            let mut query = ListQuery::new(page, page_size);
            if let Some(search) = search {
                query = query.with_search(search);
            }
            if let Some(instance) = &instance {
                query = query.with_filter("instanceId", instance);
            }
            let freshness = ledger.default_freshness();
            Ok(match kind {
                EntityKind::Instance => Output::Instances(
                    ledger.list_instances(&query, freshness, cancel).await?.into_value(),
                ),
                EntityKind::Checkout => Output::Checkouts(
                    ledger.list_checkouts(&query, freshness, cancel).await?.into_value(),
                ),
                EntityKind::Return => Output::Returns(
                    ledger.list_returns(&query, freshness, cancel).await?.into_value(),
                ),
            })
        }
        Command::Checkout {
            instance_id,
            employee_id,
            purpose,
            site,
            order,
            condition,
            comment,
            at,
        } => {
            let draft = CheckoutDraft {
                instance_id: Some(instance_id),
                employee_id: Some(employee_id),
                checkout_timestamp: at,
                purpose,
                condition_before: Some(condition),
                site,
                comment,
                order_reference: Some(order),
            };
            Ok(Output::Checkout(ledger.checkout(draft, cancel).await?))
        }
        Command::Return {
            instance_id,
            employee_id,
            condition,
            comment,
            at,
        } => {
            let draft = ReturnDraft {
                instance_id: Some(instance_id),
                employee_id: Some(employee_id),
                return_timestamp: at,
                condition_after: Some(condition),
                comment,
            };
            Ok(Output::Return(ledger.return_instance(draft, cancel).await?))
        }
        Command::Resolve {
            instance_id,
            outcome,
        } => Ok(Output::Instance(
            ledger.resolve_review(&instance_id, outcome, cancel).await?,
        )),
    }
}
