use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deepcheck_core::{BatchRequest, DetectionMode};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;

#[derive(Parser)]
#[command(name = "deepcheck", about = "Deepcheck face authenticity CLI")]
struct Cli {
    /// TOML configuration file (DEEPCHECK_* variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one or more batch request files ({"images": [{id, path, label}]})
    Batch {
        /// Request files, processed one at a time
        #[arg(required = true)]
        requests: Vec<PathBuf>,
        /// Pretty-print the JSON results
        #[arg(long)]
        pretty: bool,
    },
    /// Classify a single image
    Predict {
        image: String,
    },
    /// Show detected faces in an image
    Detect {
        image: String,
        /// Report every face above the threshold, not just the best one
        #[arg(long)]
        multiple: bool,
    },
    /// Show resolved configuration and model availability
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Batch { requests, pretty } => {
            let engine = engine::spawn_engine(&config)?;
            let mut rejected = 0usize;

            for path in &requests {
                let request = match read_batch_request(path) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::error!(
                            path = %path.display(),
                            error = %format!("{e:#}"),
                            "rejecting batch request"
                        );
                        rejected += 1;
                        continue;
                    }
                };

                let result = engine.process_batch(request.images).await?;
                let json = if pretty {
                    serde_json::to_string_pretty(&result)?
                } else {
                    serde_json::to_string(&result)?
                };
                println!("{json}");
            }

            if rejected > 0 {
                anyhow::bail!("{rejected} of {} batch requests rejected", requests.len());
            }
        }
        Commands::Predict { image } => {
            let engine = engine::spawn_engine(&config)?;
            match engine.predict(image.clone()).await? {
                Some(label) => println!("{image}: {label}"),
                None => println!("{image}: no prediction"),
            }
        }
        Commands::Detect { image, multiple } => {
            let engine = engine::spawn_engine(&config)?;
            let mode = if multiple {
                DetectionMode::Multiple
            } else {
                DetectionMode::Single
            };
            let detections = engine.detect(image.clone(), mode).await?;
            if detections.is_empty() {
                println!("{image}: no face above {:.2}", config.face_confidence);
            }
            for d in &detections {
                let b = d.bounding_box;
                println!(
                    "{image}: face ({}, {})-({}, {}) confidence {:.3}",
                    b.x0, b.y0, b.x1, b.y1, d.confidence
                );
            }
        }
        Commands::Status => {
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config": &config,
                "detector_model_present": Path::new(&config.detector_model_path()).exists(),
                "classifier_model_present": Path::new(&config.classifier_model_path()).exists(),
                "labels_present": Path::new(&config.labels_path()).exists(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

/// Parse a batch request file; malformed requests never reach the engine.
fn read_batch_request(path: &Path) -> Result<BatchRequest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading batch request {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid batch request {}", path.display()))
}
