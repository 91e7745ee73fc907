mod cli;
mod config;
mod dispatch;
mod error;
mod export;
mod orchestrator;
mod source_ids;
mod state_machine;
mod store;
#[cfg(test)]
mod testing;
mod ui;
mod workorder;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, CreateArgs};
use config::ExportConfig;
use dispatch::Dispatcher;
use export::ExportService;
use orchestrator::JobOrchestrator;
use store::{FileJobStore, JobStore};
use workorder::{ConfiguredSource, WorkOrderId};

type AppDispatcher = Dispatcher<FileJobStore, ConfiguredSource, ExportService<FileJobStore>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "woexport=debug" } else { "woexport=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = ExportConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let dispatcher = build_dispatcher(&config).await?;

    match cli.command {
        Command::Create(args) => {
            let source_ids = read_source_ids(args).await?;
            let progress = ui::JobProgress::start("Building export payload");
            let (job_id, summary) = dispatcher.submit(source_ids).await?;
            let record = dispatcher.orchestrator().store().get(job_id).await?;
            progress.complete(&record, &summary);
        }
        Command::Advance { job_id, stage } => {
            let progress = ui::JobProgress::start(&format!("Advancing {job_id} to {stage}"));
            let summary = dispatcher.write_stage(job_id, stage).await?;
            let record = dispatcher.orchestrator().store().get(job_id).await?;
            progress.complete(&record, &summary);
        }
        Command::Status { job_id } => {
            let record = dispatcher.orchestrator().store().get(job_id).await?;
            ui::print_job(&record);
        }
        Command::List => {
            let mut records = dispatcher.orchestrator().store().list().await?;
            records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            ui::print_jobs(&records);
        }
        Command::Nudge => {
            nudge(&dispatcher).await?;
        }
        Command::Watch { interval_secs } => {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            info!(interval_secs, "watching for stalled jobs");
            loop {
                tokio::select! {
                    _ = ticker.tick() => nudge(&dispatcher).await?,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    Ok(())
}

async fn build_dispatcher(config: &ExportConfig) -> Result<AppDispatcher> {
    let store = Arc::new(
        FileJobStore::open(&config.data_dir)
            .await
            .with_context(|| format!("opening job store in {}", config.data_dir.display()))?,
    );
    let source = ConfiguredSource::from_config(&config.source, &config.data_dir)
        .context("configuring work order source")?;
    let export = ExportService::new(store.clone(), config.artifacts_dir(), config.attachments_dir());
    let orchestrator = JobOrchestrator::new(store, source, export, config.clone());
    Ok(Dispatcher::new(orchestrator, config))
}

async fn read_source_ids(args: CreateArgs) -> Result<String> {
    match args.file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display())),
        None => {
            let ids: Vec<WorkOrderId> = args.ids.into_iter().map(WorkOrderId).collect();
            Ok(source_ids::to_json(&ids))
        }
    }
}

async fn nudge(dispatcher: &AppDispatcher) -> Result<()> {
    let nudged = dispatcher.nudge_stalled(Utc::now()).await?;
    if nudged.is_empty() {
        info!("no stalled jobs");
    }
    for (job_id, summary) in nudged {
        let record = dispatcher.orchestrator().store().get(job_id).await?;
        let progress = ui::JobProgress::start(&format!("Re-armed {job_id}"));
        progress.complete(&record, &summary);
    }
    Ok(())
}
