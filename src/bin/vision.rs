//! Demo CLI driving the inference service facade.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use vision_serve::{ClassifyOptions, InferenceService, ServeConfig};

#[derive(Parser)]
#[command(name = "vision", about = "Image classification and detection with history")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered models and their metadata.
    Models,
    /// Classify an image and record the outcome.
    Classify {
        image: PathBuf,
        /// Model id; unknown ids fall back to the configured default.
        #[arg(long)]
        model: Option<String>,
        /// Result length, clamped to [1, 5].
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Confidence floor, clamped to [0, 1].
        #[arg(long, default_value_t = 0.0)]
        min_prob: f32,
        /// Skip the history insert.
        #[arg(long)]
        no_record: bool,
    },
    /// Detect objects in an image.
    Detect {
        image: PathBuf,
        /// Minimum score; defaults to the configured threshold.
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Run an annotated detection pass and record the outcome.
    #[cfg(feature = "annotate")]
    Annotate {
        source: PathBuf,
        #[arg(long)]
        conf: Option<f32>,
        #[arg(long)]
        iou: Option<f32>,
    },
    /// Show history aggregates.
    Stats {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let config = ServeConfig::load()?;
    let service = InferenceService::new(config)?;

    match Args::parse().command {
        Command::Models => {
            for (id, info) in service.model_info() {
                println!("{:<20} {:<18} input {}  top-1 {}", id, info.display, info.input, info.imagenet_top1);
                println!("{:<20} {}", "", info.notes);
            }
        }
        Command::Classify {
            image,
            model,
            top_k,
            min_prob,
            no_record,
        } => {
            let filename = image
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("source path has no file name"))?
                .to_string();
            if !vision_serve::ingest::allowed_file(&filename) {
                return Err(anyhow!("unsupported file type: {}", filename));
            }
            let decoded = vision_serve::ingest::open_rgb_image(&image)?;

            let options = ClassifyOptions {
                model_id: model,
                top_k,
                min_probability: min_prob,
            };
            if no_record {
                let result = service.classify(&decoded, &options)?;
                print_classification(&result.model_id, &result.predictions, None);
            } else {
                let (result, history_id) =
                    service.classify_and_record(&decoded, &options, &filename)?;
                print_classification(&result.model_id, &result.predictions, history_id);
            }
        }
        Command::Detect { image, threshold } => {
            let decoded = vision_serve::ingest::open_rgb_image(&image)?;
            let result = match threshold {
                Some(threshold) => service.detect(&decoded, threshold)?,
                None => service.detect_default(&decoded)?,
            };

            println!(
                "{} detections in {}x{}",
                result.items.len(),
                result.image_width,
                result.image_height
            );
            for item in &result.items {
                println!(
                    "  {:<16} {:>5.1}%  box {:?}",
                    item.label,
                    item.score * 100.0,
                    item.box_pixels
                );
            }
        }
        #[cfg(feature = "annotate")]
        Command::Annotate { source, conf, iou } => {
            let conf = conf.unwrap_or(service.config().detection.conf);
            let iou = iou.unwrap_or(service.config().detection.iou);
            let (outcome, id) = service.annotate_and_record(&source, conf, iou)?;

            println!(
                "run #{}: {} detections in {} ms -> {}",
                id,
                outcome.classes.len(),
                outcome.duration_ms,
                outcome.output_path.display()
            );
            for (label, conf) in outcome.classes.iter().zip(&outcome.confs) {
                println!("  {:<16} {:>5.1}%", label, conf * 100.0);
            }
        }
        Command::Stats { limit } => {
            println!("label counts:");
            for (label, count) in service.label_counts(limit)? {
                println!("  {:<30} {}", label, count);
            }
            println!("recent:");
            for row in service.recent(limit)? {
                println!(
                    "  #{:<5} {:<24} {:<20} {:>5.1}%  {}  {}",
                    row.id,
                    row.filename,
                    row.top1_label,
                    row.top1_confidence * 100.0,
                    row.model_name,
                    row.created_at
                );
            }
        }
    }

    Ok(())
}

fn print_classification(
    model_id: &str,
    predictions: &[vision_serve::Prediction],
    history_id: Option<i64>,
) {
    match history_id {
        Some(id) => println!("model {} (history #{})", model_id, id),
        None => println!("model {}", model_id),
    }
    for prediction in predictions {
        println!("  {:<30} {:>5.1}%", prediction.label, prediction.prob * 100.0);
    }
}
