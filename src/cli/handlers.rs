//! Subcommand implementations
//!
//! Both commands share the same startup: read and validate the environment
//! configuration, then seed an in-memory catalog from descriptor files.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::commands::{CatalogArgs, ServeArgs};
use crate::build::{ArtifactPublisher, DirectoryLocks, HttpArtifactStore, PipelineController};
use crate::bus::stdio::{EnvelopeReader, StdioPublisher};
use crate::catalog::{load_catalog, seed_transports, InMemoryRepository, LoadSummary};
use crate::config::ForgelineConfig;
use crate::notify::Notifier;
use crate::process::ShellRunner;
use crate::progress::{LoggingHandler, ProgressHandler};
use crate::worker::{Worker, WorkerContext};

fn load_config() -> Result<ForgelineConfig> {
    let config = ForgelineConfig::default();
    config
        .validate()
        .context("Invalid FORGELINE_* configuration")?;
    debug!("Configuration:\n{}", config);
    Ok(config)
}

async fn load_repository(
    config: &ForgelineConfig,
) -> Result<(Arc<InMemoryRepository>, LoadSummary)> {
    let repository = Arc::new(InMemoryRepository::new());
    let summary = load_catalog(repository.as_ref(), config)
        .await
        .with_context(|| format!("Failed to load the {} catalog", config.language))?;
    Ok((repository, summary))
}

pub async fn handle_serve(args: &ServeArgs) -> Result<()> {
    let config = Arc::new(load_config()?);
    let (repository, summary) = load_repository(&config).await?;

    if let Some(path) = &args.transports {
        seed_transports(repository.as_ref(), path)
            .await
            .with_context(|| format!("Failed to seed transports from {}", path.display()))?;
    }

    let store = HttpArtifactStore::from_config(&config)
        .context("Failed to create artifact store client")?;
    let publisher = Arc::new(ArtifactPublisher::new(
        Arc::new(store),
        config.build_dir.clone(),
    ));
    let progress: Arc<dyn ProgressHandler> = Arc::new(LoggingHandler);
    let controller = PipelineController::new(
        Arc::new(ShellRunner::from_config(&config)),
        DirectoryLocks::new(),
        publisher,
        Arc::clone(&progress),
    );
    let notifier = Notifier::new(
        Arc::new(StdioPublisher::stdout()),
        config.source_label.clone(),
    );

    let mut worker = Worker::new(WorkerContext {
        config: Arc::clone(&config),
        language_id: summary.language_id,
        repository,
        controller: Arc::new(controller),
        notifier: Arc::new(notifier),
        progress,
    });

    info!(
        language = %config.language,
        max_concurrent_builds = config.max_concurrent_builds,
        "Worker ready, reading requests from stdin"
    );
    let mut reader = EnvelopeReader::stdin();
    let accepted = worker
        .run(&mut reader)
        .await
        .context("Request stream failed")?;
    info!(accepted, "Worker stopped");
    Ok(())
}

pub async fn handle_catalog(args: &CatalogArgs) -> Result<()> {
    let config = load_config()?;
    let (repository, summary) = load_repository(&config).await?;
    let counts = repository.row_counts();

    if args.json {
        let report = serde_json::json!({
            "language": config.language,
            "summary": summary,
            "counts": counts,
        });
        let rendered =
            serde_json::to_string_pretty(&report).context("Failed to render catalog summary")?;
        println!("{}", rendered);
    } else {
        println!("Language: {} (id {})", config.language, summary.language_id);
        println!(
            "Agents: {} imported, {} skipped",
            summary.agents_imported, summary.agents_skipped
        );
        println!(
            "Modules: {} imported, {} skipped",
            summary.modules_imported, summary.modules_skipped
        );
        if summary.invalid > 0 {
            println!("Invalid descriptors: {}", summary.invalid);
        }
        print!("{}", counts);
    }
    Ok(())
}
