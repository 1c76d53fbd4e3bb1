//! badge-watch - pixel-only dashboard state classifier
//!
//! Classifies dashboard screenshots and reports, as JSON, whether
//! unprocessed items exist for a date.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::unbounded;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use badge_watch::analysis::{Classifier, Inspection, Verdict};
use badge_watch::capture::{CaptureService, FileCapture};
use badge_watch::config::{self, AppConfig, BackendConfig};
use badge_watch::error::RecognitionError;
use badge_watch::notify::{self, DirNotifier, LogNotifier, Notifier};
use badge_watch::schedule::{self, Target, TargetDay};
use badge_watch::vision::{LazyRecognizer, ModelManager, PaddleConfig, PaddleRecognizer, TextRecognizer};

/// badge-watch - find unprocessed-item markers on a dashboard screenshot
#[derive(Parser, Debug)]
#[command(name = "badge-watch", version)]
#[command(about = "Pixel-only dashboard state classifier")]
struct Args {
    /// Config file (defaults to the user config directory, if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one screenshot
    Check {
        image: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// Write the debug overlay PNG here
        #[arg(long)]
        overlay: Option<PathBuf>,

        /// Write segmentation masks into this directory
        #[arg(long)]
        mask_dir: Option<PathBuf>,

        /// Also write alerts (screenshot + caption) into this directory
        #[arg(long)]
        alert_dir: Option<PathBuf>,

        /// Dashboard name used in alert captions
        #[arg(long, default_value = "dashboard")]
        site: String,

        /// Pretty-print the JSON verdict
        #[arg(long)]
        pretty: bool,
    },

    /// Classify several screenshots on worker threads
    Batch {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[command(flatten)]
        target: TargetArgs,

        /// Worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print built-in defaults instead of the loaded file
        #[arg(long)]
        defaults: bool,

        /// Save the printed configuration to the default location
        #[arg(long)]
        write: bool,
    },

    /// Download recognition models
    Models {
        /// Only show which models are present
        #[arg(long)]
        status: bool,
    },
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Date label to look for, e.g. 5.11
    #[arg(long)]
    date: Option<String>,

    /// Which day to check when no explicit date is given
    #[arg(long, value_enum, default_value_t = TargetDay::Auto)]
    day: TargetDay,
}

impl TargetArgs {
    fn resolve(&self, config: &AppConfig) -> Target {
        match &self.date {
            Some(label) => Target {
                label: label.trim().to_string(),
                is_today: false,
            },
            None => schedule::current_target(self.day, &config.schedule),
        }
    }
}

#[derive(Serialize)]
struct BatchEntry {
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let app_config = resolve_config(args.config.as_deref())?;

    match args.command {
        Command::Check {
            image,
            target,
            overlay,
            mask_dir,
            alert_dir,
            site,
            pretty,
        } => {
            let target = target.resolve(&app_config);
            let classifier = build_classifier(&app_config)?;
            let frame = FileCapture::new(&image).capture()?;

            let mut inspection = classifier.inspect(&frame.image, &target.label)?;
            if overlay.is_some() {
                inspection = classifier.attach_overlay(&frame.image, inspection);
            }
            if let Some(path) = &overlay {
                write_overlay(&inspection, path)?;
            }
            if let Some(dir) = &mask_dir {
                write_masks(&inspection, dir)?;
            }

            let verdict = &inspection.verdict;
            if verdict.present {
                let caption = notify::caption(&target.label, target.is_today, verdict, &site);
                let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
                if let Some(dir) = alert_dir {
                    notifiers.push(Box::new(DirNotifier::new(dir)));
                }
                for notifier in &notifiers {
                    notify::deliver(notifier.as_ref(), verdict, &frame.image, &caption);
                }
            }

            let json = if pretty {
                serde_json::to_string_pretty(verdict)?
            } else {
                serde_json::to_string(verdict)?
            };
            println!("{}", json);
        }

        Command::Batch {
            images,
            target,
            workers,
        } => {
            let target = target.resolve(&app_config);
            let classifier = Arc::new(build_classifier(&app_config)?);
            let entries = run_batch(classifier, images, &target.label, workers);
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }

        Command::Config { defaults, write } => {
            let printed = if defaults { AppConfig::default() } else { app_config };
            print!("{}", toml::to_string_pretty(&printed)?);
            if write {
                let path = config::default_config_path()?;
                config::save_config(&printed, &path)?;
                info!("Configuration saved to {:?}", path);
            }
        }

        Command::Models { status } => {
            let manager = model_manager(&app_config.backend)?;
            if !status {
                manager.ensure_all_models()?;
            }
            for (model_type, available, size) in manager.get_model_status() {
                println!(
                    "{:<24} {:<8} {}",
                    model_type.display_name(),
                    if available { "ready" } else { "missing" },
                    size.map(|s| format!("{} bytes", s)).unwrap_or_default()
                );
            }
            println!("models directory: {}", manager.models_dir().display());
        }
    }

    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        return config::load_config(path);
    }
    let default_path = config::default_config_path()?;
    if default_path.exists() {
        info!("Loading configuration from {:?}", default_path);
        config::load_config(&default_path)
    } else {
        Ok(AppConfig::default())
    }
}

fn model_manager(backend: &BackendConfig) -> Result<ModelManager> {
    match &backend.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone()),
        None => ModelManager::new(),
    }
}

/// Classifier over a lazily loaded PaddleOCR backend
///
/// The backend is loaded here rather than on the first recognize call so a
/// missing model fails the command instead of reading as "date not found".
fn build_classifier(app_config: &AppConfig) -> Result<Classifier> {
    let backend = app_config.backend.clone();
    let recognizer = Arc::new(LazyRecognizer::new("paddleocr", move || {
        let manager = model_manager(&backend).map_err(|e| RecognitionError::Init(format!("{:#}", e)))?;
        let paddle_config = PaddleConfig {
            intra_threads: backend.intra_threads,
            min_text_confidence: backend.min_confidence,
            ..PaddleConfig::default()
        };
        let paddle = PaddleRecognizer::from_manager(&manager, paddle_config)?;
        Ok(Box::new(paddle) as Box<dyn TextRecognizer>)
    }));
    recognizer.get().context("Recognition backend unavailable")?;

    Ok(Classifier::new(app_config.detector.clone(), recognizer)?)
}

fn run_batch(classifier: Arc<Classifier>, images: Vec<PathBuf>, target: &str, workers: usize) -> Vec<BatchEntry> {
    let (job_tx, job_rx) = unbounded::<(usize, PathBuf)>();
    let (result_tx, result_rx) = unbounded::<(usize, BatchEntry)>();
    let total = images.len();

    for job in images.into_iter().enumerate() {
        // receiver outlives this loop
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for worker in 0..workers.clamp(1, total.max(1)) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let classifier = Arc::clone(&classifier);
            scope.spawn(move || {
                for (index, path) in job_rx.iter() {
                    let entry = classify_file(&classifier, &path, target);
                    if let Some(error) = &entry.error {
                        warn!("Worker {}: {:?} failed: {}", worker, path, error);
                    }
                    let _ = result_tx.send((index, entry));
                }
            });
        }
    });
    drop(result_tx);

    let mut results: Vec<(usize, BatchEntry)> = result_rx.iter().collect();
    results.sort_by_key(|(index, _)| *index);
    info!("Classified {} screenshot(s)", results.len());
    results.into_iter().map(|(_, entry)| entry).collect()
}

fn classify_file(classifier: &Classifier, path: &Path, target: &str) -> BatchEntry {
    let outcome = FileCapture::new(path)
        .capture()
        .and_then(|frame| Ok(classifier.classify(&frame.image, target)?));

    match outcome {
        Ok(verdict) => BatchEntry {
            path: path.to_path_buf(),
            verdict: Some(verdict),
            error: None,
        },
        Err(e) => BatchEntry {
            path: path.to_path_buf(),
            verdict: None,
            error: Some(format!("{:#}", e)),
        },
    }
}

fn write_overlay(inspection: &Inspection, path: &Path) -> Result<()> {
    if let Some(overlay) = &inspection.verdict.debug_overlay {
        overlay
            .save(path)
            .with_context(|| format!("Failed to write overlay {:?}", path))?;
        info!("Overlay written to {:?}", path);
    }
    Ok(())
}

fn write_masks(inspection: &Inspection, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    for mask in &inspection.masks {
        let region = mask.region;
        if region.is_empty() {
            continue;
        }
        let path = dir.join(format!("{}_{}_{}.png", mask.class, region.x, region.y));
        mask.mask
            .save(&path)
            .with_context(|| format!("Failed to write mask {:?}", path))?;
    }
    info!("{} mask(s) written to {:?}", inspection.masks.len(), dir);
    Ok(())
}
