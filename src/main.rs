mod cancel;
mod config;
mod discovery;
mod error;
mod http;
mod import;
mod mapping;
mod redact;
mod report;
mod submission;
mod telemetry;

use crate::cancel::Cancellation;
use crate::config::{Cli, ImporterConfig, LoggingOptions};
use crate::discovery::FsDiscovery;
use crate::error::ImportResult;
use crate::import::model::{RunMetadata, RunSummary, UnmappedPolicy};
use crate::import::service::Importer;
use crate::mapping::resolver::IdentifierResolvers;
use crate::report::parser::JUnitParser;
use crate::submission::client::{AquaClient, SubmissionClient};
use crate::telemetry::{AtomicCounters, SystemClock};
use anyhow::anyhow;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const CONFIG_ERROR_EXIT: u8 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match ImporterConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("aborting due to invalid configuration");
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };
    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("{e}");
    }

    let cancel = Cancellation::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling import");
            signal.cancel();
        }
    });

    let counters = Arc::new(AtomicCounters::new());
    let span = info_span!("run", run_id = %Uuid::new_v4());
    let outcome = run(config, &cancel, counters.clone()).instrument(span).await;
    debug!(counters = ?counters.snapshot(), "run counters");
    let code = match outcome {
        Ok(summary) => summary.outcome().exit_code(),
        Err(e) if e.is_cancelled() => {
            warn!("import cancelled");
            e.exit_code()
        }
        Err(e) => {
            error!(error = %e, "import failed");
            e.exit_code()
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(CONFIG_ERROR_EXIT))
}

async fn run(
    config: ImporterConfig,
    cancel: &Cancellation,
    counters: Arc<AtomicCounters>,
) -> ImportResult<RunSummary> {
    info!(
        base_url = config.aqua.base_url.as_deref().unwrap_or("<not set>"),
        timeout_seconds = config.http.timeout_seconds,
        dry_run = config.behavior.dry_run,
        "configuration loaded"
    );

    let resolvers = IdentifierResolvers::from_options(&config.mapping)?;
    let client: Option<Arc<dyn SubmissionClient>> = if config.behavior.dry_run {
        None
    } else {
        Some(Arc::new(AquaClient::new(&config.aqua, &config.http)?))
    };

    let importer = Importer::builder()
        .discovery(Arc::new(FsDiscovery::new(config.input)?))
        .parser(Arc::new(JUnitParser))
        .maybe_client(client)
        .resolvers(resolvers)
        .policy(UnmappedPolicy::from_flags(
            config.behavior.skip_unmapped,
            config.behavior.fail_on_unmapped,
        ))
        .metadata(RunMetadata {
            run_name: config.run.name,
            external_run_id: config.run.external_run_id,
            project_id: config.aqua.project_id,
        })
        .dry_run(config.behavior.dry_run)
        .counters(counters)
        .clock(Arc::new(SystemClock))
        .build();

    importer.run(cancel).await
}

/// Logs go to stderr. `RUST_LOG` directives refine the configured level.
fn init_tracing(logging: &LoggingOptions) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(logging.level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))
}
