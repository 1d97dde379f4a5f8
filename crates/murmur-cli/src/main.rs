//! `murmur` -- multi-channel conversational agent orchestrator.
//!
//! Subcommands:
//!
//! - `murmur gateway` -- run the full pipeline (transports, router,
//!   dispatcher, cron) until interrupted.
//! - `murmur status` -- print the resolved configuration summary.
//! - `murmur cron` -- inspect and edit the persisted job store.

use std::collections::HashMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod app;
mod lock;

use murmur_types::config::Config;

/// murmur conversation orchestrator CLI.
#[derive(Parser)]
#[command(name = "murmur", about = "Multi-channel conversational agent orchestrator", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (channels + routing + loops + cron).
    Gateway,

    /// Show the resolved configuration.
    Status,

    /// Manage scheduled jobs.
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand)]
enum CronAction {
    /// List persisted jobs.
    List,
    /// Add a job from a schedule spec (e.g. "every 10m 상태 점검").
    Add {
        /// Schedule spec plus message.
        spec: Vec<String>,
    },
    /// Remove a job by id.
    Remove {
        /// Job id.
        id: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config::from_env();
    match cli.command {
        Commands::Gateway => runtime.block_on(run_gateway(config)),
        Commands::Status => {
            print_status(&config);
            ExitCode::SUCCESS
        }
        Commands::Cron { action } => runtime.block_on(run_cron(config, action)),
    }
}

async fn run_gateway(config: Config) -> ExitCode {
    // One gateway per workspace.
    let lock_path = config.workspace_dir.join("runtime").join("instance.lock");
    let _lock = match lock::InstanceLock::acquire(lock_path) {
        Ok(lock) => lock,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Transports and provider adapters are deployment-specific; the
    // stock binary starts with none and everything wired behind traits.
    let app = match app::App::build(config, Vec::new(), HashMap::new()).await {
        Ok(app) => app,
        Err(e) => {
            error!("bootstrap failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            signal_cancel.cancel();
        }
    });

    match app.run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("gateway failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_status(config: &Config) {
    println!("workspace:   {}", config.workspace_dir.display());
    println!("alias:       {}", config.default_alias);
    println!("executor:    {}", config.loops.executor_provider);
    println!(
        "fallback:    {}",
        config.loops.fallback_provider.as_deref().unwrap_or("-")
    );
    for provider in murmur_types::config::PROVIDERS {
        let state = match config.provider(provider) {
            Some(p) if !p.default_channel.is_empty() => {
                format!("configured (default: {})", p.default_channel)
            }
            Some(_) => "configured".to_string(),
            None => "not configured".to_string(),
        };
        println!("{provider:<12} {state}");
    }
    println!(
        "router:      poll={}ms concurrency={} auto_reply={}",
        config.router.poll_interval_ms, config.router.inbound_concurrency, config.router.auto_reply
    );
    println!(
        "dispatch:    inline_max={} retry_max={} dlq={}",
        config.dispatch.inline_max,
        config.dispatch.retry_max,
        config.dispatch.dlq_path.display()
    );
}

async fn run_cron(config: Config, action: CronAction) -> ExitCode {
    use murmur_core::commands::parse_schedule_spec;
    use murmur_services::cron_service::storage::CronStorage;

    let storage_path = config
        .workspace_dir
        .join("runtime")
        .join("cron")
        .join("jobs.jsonl");
    let storage = CronStorage::new(storage_path);

    match action {
        CronAction::List => {
            let jobs = match storage.load_jobs().await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("load failed: {e}");
                    return ExitCode::FAILURE;
                }
            };
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in jobs {
                println!(
                    "{} {:<30} enabled={} next={:?}",
                    job.id, job.name, job.enabled, job.state.next_run_at_ms
                );
            }
            ExitCode::SUCCESS
        }
        CronAction::Add { spec } => {
            let spec = spec.join(" ");
            let now_ms = chrono::Utc::now().timestamp_millis();
            let Some((schedule, message)) = parse_schedule_spec(&spec, now_ms) else {
                eprintln!("unparseable spec: {spec}");
                return ExitCode::FAILURE;
            };
            let job = murmur_types::cron::CronJob {
                id: format!("job-{}", uuid::Uuid::new_v4()),
                name: message.clone(),
                enabled: true,
                schedule,
                payload: murmur_types::cron::CronPayload {
                    message,
                    deliver: true,
                    ..Default::default()
                },
                state: Default::default(),
                created_at_ms: now_ms,
                updated_at_ms: now_ms,
                delete_after_run: false,
            };
            match storage.append_upsert(&job).await {
                Ok(()) => {
                    println!("{}", job.id);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("persist failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        CronAction::Remove { id } => match storage.append_delete(&id).await {
            Ok(()) => {
                println!("removed {id}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("persist failed: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
