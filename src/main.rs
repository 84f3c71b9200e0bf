use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

mod cli;

use cli::commands::assign::AssignCommand;
use cli::commands::inspect::InspectCommand;
use cli::commands::lifecycle::{parse_fields, LifecycleCommand};
use cli::commands::price::SetPriceCommand;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use prodflow::{init_telemetry, Actor, EngineMetrics, ProdflowConfig, StepAction, StepError};

/// Exit code for operations the engine rejected (guards, validation, conflicts)
const EXIT_REJECTED: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            match e.downcast_ref::<StepError>() {
                Some(step_error) if step_error.is_recoverable() => {
                    eprintln!("Category: {}", step_error.category());
                    ExitCode::from(EXIT_REJECTED)
                }
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let _ = ProdflowConfig::load_env_file();
    let config = ProdflowConfig::load()?;
    init_telemetry(
        cli.json_logs || config.observability.json_logs,
        &config.observability.log_level,
    )?;

    let metrics_enabled = config.observability.metrics_enabled;
    let ctx = CommandContext {
        actor: Actor {
            user_id: cli.actor,
            is_admin: cli.admin,
        },
        workspace: cli.workspace,
        remote: cli.remote,
        metrics: Arc::new(EngineMetrics::new()),
        config,
    };

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Status { request } => {
                InspectCommand::Status { request }.execute(&ctx).await
            }
            Commands::Show { request, step } => {
                InspectCommand::Show { request, step }.execute(&ctx).await
            }
            Commands::HoldInfo { request, step } => {
                InspectCommand::HoldInfo { request, step }.execute(&ctx).await
            }
            Commands::Actions { request, step } => {
                InspectCommand::Actions { request, step }.execute(&ctx).await
            }
            Commands::Options { request, step } => {
                InspectCommand::Options { request, step }.execute(&ctx).await
            }
            Commands::Start { request, step } => {
                LifecycleCommand::new(request, step, StepAction::Start)
                    .execute(&ctx)
                    .await
            }
            Commands::Hold { request, step } => {
                LifecycleCommand::new(request, step, StepAction::Hold)
                    .execute(&ctx)
                    .await
            }
            Commands::Continue { request, step } => {
                LifecycleCommand::new(request, step, StepAction::Continue)
                    .execute(&ctx)
                    .await
            }
            Commands::Complete {
                request,
                step,
                fields,
                fields_file,
            } => {
                let submitted = parse_fields(&fields, fields_file.as_deref())?;
                LifecycleCommand::new(request, step, StepAction::Complete)
                    .with_fields(submitted)
                    .execute(&ctx)
                    .await
            }
            Commands::Cancel {
                request,
                step,
                reason,
            } => {
                LifecycleCommand::new(request, step, StepAction::Cancel { reason })
                    .execute(&ctx)
                    .await
            }
            Commands::Skip {
                request,
                step,
                reason,
            } => {
                LifecycleCommand::new(request, step, StepAction::Skip { reason })
                    .execute(&ctx)
                    .await
            }
            Commands::Assign {
                request,
                step,
                user,
            } => AssignCommand { request, step, user }.execute(&ctx).await,
            Commands::SetPrice {
                request,
                step,
                amount,
            } => {
                SetPriceCommand {
                    request,
                    step,
                    amount,
                }
                .execute(&ctx)
                .await
            }
        }
    });

    if metrics_enabled {
        ctx.metrics.log_stats();
    }
    result
}
