//! print-egress command line.
//!
//! ```text
//! print-egress --config egress.toml --app default fetch http://tiles/a.png ...
//! print-egress --config egress.toml --app default route http://tiles/a.png
//! print-egress --config egress.toml --app default poll --interval-secs 30 http://...
//! ```
//!
//! `fetch` runs one job and prints its summary and status. `route` prints
//! the route a request would take without sending it. `poll` repeats the job
//! until interrupted, reloading policies whenever the config file changes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Method;

use print_egress::config::{load_policies, ConfigHandle, ConfigWatcher, PolicySet, ServiceConfig};
use print_egress::http::{ClientSettings, SharedClient};
use print_egress::jobs::{InMemoryJobStore, JobRunner, JobState, PrintJob, SummaryRenderer};
use print_egress::observability::{logging, metrics};
use print_egress::routing::{AmbientJobContext, MatchInfo};

#[derive(Parser)]
#[command(name = "print-egress")]
#[command(about = "Fetch print job resources through per-app egress policies", long_about = None)]
struct Cli {
    /// TOML configuration file. Without it no policies apply.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// App whose egress policy applies.
    #[arg(short, long, default_value = "default", global = true)]
    app: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch resources as one job
    Fetch {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Show the route a request would take
    Route {
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        url: String,
    },
    /// Run the job repeatedly, reloading policies on config change
    Poll {
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, policies) = match &cli.config {
        Some(path) => load_policies(path)?,
        None => (ServiceConfig::default(), PolicySet::default()),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), app = %cli.app, "print-egress starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let handle = Arc::new(ConfigHandle::new(policies));
    if handle.policy_for(&cli.app).is_none() {
        tracing::warn!(app = %cli.app, "No egress policy for app, requests go direct");
    }
    let client = Arc::new(SharedClient::new(ClientSettings::from_config(&config.client)));

    match cli.command {
        Commands::Route { method, url } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
            let info = MatchInfo::parse(&url, &method)?;
            let planned = match handle.policy_for(&cli.app) {
                Some(policy) => AmbientJobContext::scope(policy, client.planner().plan(info)).await,
                None => client.planner().plan(info).await,
            };
            match planned {
                Ok(plan) if plan.addresses.is_empty() => println!("{}", plan.route),
                Ok(plan) => println!("{} {:?}", plan.route, plan.addresses),
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Fetch { urls } => {
            let runner = job_runner(client);
            let job = PrintJob::new(&cli.app, handle.policy_for(&cli.app), urls);
            runner.submit(&job);
            let report = runner.run(job).await;
            if let Some(output) = &report.output {
                println!("{}", String::from_utf8_lossy(output));
            }
            eprintln!("{}", serde_json::to_string_pretty(&report.status)?);
            if report.status.state != JobState::Finished {
                std::process::exit(1);
            }
        }
        Commands::Poll { interval_secs, urls } => {
            let _watcher = match &cli.config {
                Some(path) => Some(ConfigWatcher::new(path, handle.clone()).run()?),
                None => None,
            };
            let store = Arc::new(InMemoryJobStore::new());
            let runner = JobRunner::new(client, store.clone(), Arc::new(SummaryRenderer));
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Policies are read per job, so a reload applies from the next run.
                        let job = PrintJob::new(&cli.app, handle.policy_for(&cli.app), urls.clone());
                        runner.submit(&job);
                        let report = runner.run(job).await;
                        println!("{}", serde_json::to_string(&report.status)?);
                        // Statuses are printed above; nothing reads them afterwards.
                        let evicted = store.evict_done();
                        tracing::debug!(evicted, remaining = store.len(), "Evicted finished job statuses");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted, stopping");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn job_runner(client: Arc<SharedClient>) -> JobRunner {
    JobRunner::new(client, Arc::new(InMemoryJobStore::new()), Arc::new(SummaryRenderer))
}
