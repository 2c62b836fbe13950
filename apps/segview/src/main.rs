use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_class_catalog, load_settings, view, BlobPreviewRegistry, ClientSettings, HealthMonitor,
    HttpInferenceClient, ImageFile, InferenceApi, MetadataState, SubmitOutcome,
    WorkflowController,
};
use shared::domain::AnalysisResult;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "segview", about = "Client for a semantic segmentation inference service")]
struct Args {
    /// Overrides the configured service base URL.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// TOML settings file (defaults to ./segview.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload an image and print the segmentation summary.
    Analyze {
        image: PathBuf,
        /// Write the returned images into this directory.
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// Watch the service health indicator.
    Health {
        #[arg(long, default_value_t = 1)]
        ticks: u32,
    },
    /// Print model metadata.
    Info,
    /// Print the class colour legend.
    Classes,
    /// List recently stored predictions.
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings =
        load_settings(args.config.as_deref()).context("failed to load segview settings")?;
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
        settings.validate().context("invalid --api-url")?;
    }
    info!(api = %settings.api_base_url, "using segmentation service");

    let api = Arc::new(HttpInferenceClient::new(settings.clone()));
    match args.command {
        Command::Analyze { image, save_dir } => {
            analyze(api, &settings, &image, save_dir.as_deref()).await
        }
        Command::Health { ticks } => watch_health(api, &settings, ticks).await,
        Command::Info => {
            let info = api
                .model_info()
                .await
                .context("failed to fetch model info")?;
            for line in view::metadata_lines(&MetadataState::Present(info.into())) {
                println!("{line}");
            }
            Ok(())
        }
        Command::Classes => {
            let catalog = load_class_catalog(api.as_ref(), settings.probe_timeout).await;
            for line in view::legend_lines(&catalog) {
                println!("{line}");
            }
            Ok(())
        }
        Command::History => {
            let predictions = api
                .recent_predictions()
                .await
                .context("failed to list predictions")?;
            if predictions.is_empty() {
                println!("No predictions yet.");
            }
            for summary in &predictions {
                println!("{}", view::history_line(summary));
            }
            Ok(())
        }
    }
}

async fn analyze(
    api: Arc<HttpInferenceClient>,
    settings: &ClientSettings,
    path: &Path,
    save_dir: Option<&Path>,
) -> Result<()> {
    let image = ImageFile::from_path(path).await?;
    let controller =
        WorkflowController::new(api, BlobPreviewRegistry::new(), settings.request_timeout);

    controller.select(image)?;
    let selected = controller.phase();
    println!("{}", view::phase_line(&selected));

    let mut phases = controller.subscribe();
    let progress = tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let label = phases.borrow_and_update().progress_label();
            if let Some(label) = label {
                println!("{label}");
            }
        }
    });

    let outcome = controller.submit().await;
    progress.abort();

    match outcome? {
        SubmitOutcome::Succeeded(result) => {
            for line in view::result_lines(&result) {
                println!("{line}");
            }
            if let Some(dir) = save_dir {
                save_images(&result, dir).await?;
            }
            Ok(())
        }
        SubmitOutcome::Failed(cause) => {
            let message = cause.user_message();
            Err(anyhow::Error::new(cause).context(message))
        }
        SubmitOutcome::Discarded => bail!("analysis was cancelled before the response arrived"),
    }
}

async fn save_images(result: &AnalysisResult, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create '{}'", dir.display()))?;

    for (name, image) in result.images.named() {
        if !image.is_inline() {
            warn!(name, reference = image.as_str(), "skipping non-inline image");
            continue;
        }
        let bytes = image
            .decode_inline()
            .with_context(|| format!("failed to decode {name} image"))?;
        let target = dir.join(view::export_file_name(name, image));
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write '{}'", target.display()))?;
        println!("Saved {}", target.display());
    }
    Ok(())
}

async fn watch_health(
    api: Arc<HttpInferenceClient>,
    settings: &ClientSettings,
    ticks: u32,
) -> Result<()> {
    let monitor = HealthMonitor::start(api, settings.health_interval, settings.probe_timeout);
    let mut health = monitor.subscribe_health();

    for _ in 0..ticks {
        health.changed().await.context("health monitor stopped")?;
        let snapshot = health.borrow_and_update().clone();
        let [connection, model] = view::health_lines(snapshot.as_ref());
        let checked_at = snapshot
            .map(|s| s.checked_at.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!("{checked_at}  {connection} | {model}");
    }

    let mut metadata = monitor.subscribe_metadata();
    let state = metadata
        .wait_for(|state| *state != MetadataState::Pending)
        .await
        .context("metadata fetch stopped")?
        .clone();
    for line in view::metadata_lines(&state) {
        println!("{line}");
    }

    monitor.shutdown();
    Ok(())
}
