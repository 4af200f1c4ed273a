//! schemaguard CLI
//!
//! Command-line front end for the schema validation and setup engine.
//! Supports interactive use and CI/CD pipelines: `validate` for drift
//! checks, `setup` for full remediation, `layer`/`dry-run` for staged
//! rollouts.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process;

use schemaguard::catalog::defaults::platform_catalog;
use schemaguard::{
    connect_with_timeout, EngineConfig, EngineEvent, ExecutionCoordinator, ExecutionResult,
    MayPostgresExecutor, PgBackend, RunOptions, SetupLayer, StepStatus, ValidationReport,
};

#[derive(Parser)]
#[command(name = "schemaguard")]
#[command(about = "Schema validation and setup tool for PostgreSQL")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Emit machine-readable JSON instead of formatted text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the live schema against the catalog (no side effects)
    Validate,

    /// Run the full setup pipeline: validate, generate, execute
    Setup {
        /// Report what would be fixed without executing anything
        #[arg(long)]
        check_only: bool,

        /// Invoke the backup hook before applying changes
        #[arg(long)]
        backup: bool,

        /// Do not roll back completed scripts on failure
        #[arg(long)]
        no_rollback: bool,
    },

    /// Execute a single layer (tables, indexes, policies, functions)
    Layer {
        /// Layer name
        id: String,

        /// Do not roll back completed scripts on failure
        #[arg(long)]
        no_rollback: bool,
    },

    /// Show what a layer would execute without running any DDL
    DryRun {
        /// Layer name
        id: String,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    } else if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match run(cli) {
        Ok(()) => {
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{} {e:#}", "❌ Error:".red());
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::load().unwrap_or_else(|e| {
        log::warn!("could not load configuration ({e}); using defaults");
        EngineConfig::default()
    });

    let database_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("SCHEMAGUARD_DATABASE_URL").ok())
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| config.url.clone());

    let client = connect_with_timeout(&database_url, config.statement_timeout_seconds)
        .context("failed to connect to database")?;
    let executor = MayPostgresExecutor::new(client);
    let backend = PgBackend::new(&executor, config.read_retries);
    let coordinator = ExecutionCoordinator::new(platform_catalog(), &backend);

    match cli.command {
        Commands::Validate => {
            let report = coordinator
                .validate_only()
                .context("validation could not reach the database")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Commands::Setup {
            check_only,
            backup,
            no_rollback,
        } => {
            let options = RunOptions {
                auto_fix: !check_only,
                create_backup: backup || config.create_backup,
                enable_rollback: !no_rollback && config.enable_rollback,
            };
            let result = run_with_progress(&coordinator, cli.quiet || cli.json, || {
                coordinator.run_full_setup(options)
            })?;
            report_result(&result, cli.json)
        }
        Commands::Layer { id, no_rollback } => {
            let layer: SetupLayer = id.parse().map_err(anyhow::Error::msg)?;
            let options = RunOptions {
                enable_rollback: !no_rollback && config.enable_rollback,
                ..RunOptions::default()
            };
            let result = run_with_progress(&coordinator, cli.quiet || cli.json, || {
                coordinator.execute_layer(layer, options)
            })?;
            report_result(&result, cli.json)
        }
        Commands::DryRun { id } => {
            let layer: SetupLayer = id.parse().map_err(anyhow::Error::msg)?;
            let dry = coordinator.dry_run(layer)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&dry)?);
            } else {
                println!("\n🔍 Dry run for layer '{}'\n", dry.layer);
                println!("  Statements:      {}", dry.statement_count);
                println!(
                    "  Affected tables: {}",
                    if dry.affected_tables.is_empty() {
                        "none".to_string()
                    } else {
                        dry.affected_tables.join(", ")
                    }
                );
                println!("  Estimated time:  ~{}ms", dry.estimated_ms);
                for warning in &dry.warnings {
                    println!("  {} {warning}", "⚠".yellow());
                }
            }
            Ok(())
        }
    }
}

/// Run a workflow while a coroutine prints its event stream
fn run_with_progress<F>(
    coordinator: &ExecutionCoordinator<'_>,
    silent: bool,
    workflow: F,
) -> anyhow::Result<ExecutionResult>
where
    F: FnOnce() -> Result<ExecutionResult, schemaguard::ExecuteError>,
{
    let printer = if silent {
        None
    } else {
        let rx = coordinator.subscribe();
        Some(may::go!(move || {
            for event in rx.iter() {
                match event {
                    EngineEvent::StepChanged { step } => {
                        let marker = match step.status {
                            StepStatus::Running => "⏳".normal(),
                            StepStatus::Completed => "✓".green(),
                            StepStatus::Failed => "✗".red(),
                            StepStatus::Skipped => "⊘".yellow(),
                            StepStatus::Pending => "·".normal(),
                        };
                        println!("  {marker} {} ({})", step.name, step.status);
                    }
                    EngineEvent::Progress { progress } => {
                        if progress.status == StepStatus::Completed {
                            println!(
                                "    {:>5.1}% ({}/{})",
                                progress.percent, progress.current_step, progress.total_steps
                            );
                        }
                    }
                    EngineEvent::Finished { .. } => break,
                    EngineEvent::PhaseChanged { .. } => {}
                }
            }
        }))
    };

    let result = workflow();

    if let Some(handle) = printer {
        let _ = handle.join();
    }

    Ok(result?)
}

fn report_result(result: &ExecutionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!();
        if result.success {
            println!("{} {} ({})", "✅".normal(), result.message, result.code);
        } else {
            println!("{} {} ({})", "❌".normal(), result.message, result.code);
        }
        if !result.steps.is_empty() {
            println!(
                "   {} completed, {} failed, {} skipped in {}ms",
                result.completed_count,
                result.failed_count,
                result.skipped_count,
                result.duration().num_milliseconds()
            );
        }
        if result.rollback_executed {
            println!("   {}", "completed scripts were rolled back".yellow());
        }
    }

    if !result.success {
        bail!(
            "{}",
            result
                .error
                .clone()
                .unwrap_or_else(|| result.message.clone())
        );
    }
    Ok(())
}

fn print_report(report: &ValidationReport) {
    println!("\n📊 Schema Validation Report\n");

    let score = report.summary.overall_score;
    let score_text = format!("{score}/100");
    let colored_score = if score >= 90 {
        score_text.green()
    } else if score >= 70 {
        score_text.yellow()
    } else {
        score_text.red()
    };
    println!("  Overall score: {colored_score}");
    println!(
        "  Tables:    {}/{} valid",
        report.summary.tables_valid, report.summary.tables_total
    );
    println!(
        "  Indexes:   {}/{} valid",
        report.summary.indexes_valid, report.summary.indexes_total
    );
    println!(
        "  Policies:  {}/{} valid",
        report.summary.policies_valid, report.summary.policies_total
    );
    println!(
        "  Functions: {}/{} valid",
        report.summary.functions_valid, report.summary.functions_total
    );
    println!(
        "  Migrations recorded: {}{}",
        report.migrations.applied.len(),
        if report.migrations.ledger_present {
            ""
        } else {
            " (ledger not initialized yet)"
        }
    );

    if !report.errors.is_empty() {
        println!("\n❌ Errors ({}):", report.errors.len());
        for error in &report.errors {
            println!("  ✗ {error}");
        }
    }
    if !report.warnings.is_empty() {
        println!("\n⚠️  Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  ⚠ {warning}");
        }
    }
    if !report.recommendations.is_empty() {
        println!("\n💡 Recommendations:");
        for recommendation in &report.recommendations {
            println!("  → {recommendation}");
        }
    }
    println!();
}
