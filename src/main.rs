// src/main.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::Mutex;

use coletores::{
    export, CanonicalStore, FileConfig, JsonlSource, PipelineDriver, ProgressTracker,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    info!("Starting plant-collector canonicalization pipeline");

    // First argument is an optional config file; fall back to
    // coletores.toml next to the binary, then to built-in defaults.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;
    config
        .pipeline
        .validate()
        .context("Invalid pipeline configuration")?;

    let source_path = config.run.source_path.clone().context(
        "No source configured: set [run] source_path to a JSONL records file",
    )?;
    let mut source = JsonlSource::open(&source_path)
        .with_context(|| format!("Failed to open source {}", source_path.display()))?;

    let store = CanonicalStore::open(
        &config.run.db_path,
        config.pipeline.similarity_weights,
        config.pipeline.confidence_threshold,
    )
    .with_context(|| format!("Failed to open store {}", config.run.db_path.display()))?;
    let store = Arc::new(Mutex::new(store));
    info!("Canonical store ready at {}", config.run.db_path.display());

    let mut driver = PipelineDriver::new(config.pipeline.clone(), Arc::clone(&store))
        .context("Failed to build pipeline driver")?;
    if let Some(progress_path) = &config.run.progress_path {
        let tracker = ProgressTracker::open(progress_path)
            .with_context(|| format!("Failed to open tracker {}", progress_path.display()))?;
        driver = driver.with_progress(Arc::new(Mutex::new(tracker)));
        info!("Resume tracking enabled at {}", progress_path.display());
    }

    let run_result = driver
        .run(
            &mut source,
            config.run.max_records,
            config.run.progress_interval,
        )
        .await;

    // Export whatever was persisted, even if the run stopped early.
    let entities = store.lock().await.all().context("Failed to read entities")?;
    match export::export_csv(&entities, &config.run.csv_path) {
        Ok(count) => info!(
            "CSV export complete: {count} entities at {}",
            config.run.csv_path.display()
        ),
        Err(e) => warn!("CSV export failed: {e}"),
    }

    run_result.context("Pipeline run failed")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            let default_path = Path::new("coletores.toml");
            if default_path.exists() {
                FileConfig::load(default_path).context("Failed to load coletores.toml")
            } else {
                info!("No config file found, using built-in defaults");
                Ok(FileConfig::default())
            }
        }
    }
}
