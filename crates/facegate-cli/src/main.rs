use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{DetectorParams, LbphClassifier, SeetaDetector};
use facegate_engine::{CancelToken, Config, EnrollmentState, FaceGate, RecognitionState};
use facegate_hw::{open_source, Camera, CameraError, SourceDescriptor, VideoSource};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

type Gate = FaceGate<SeetaDetector, LbphClassifier>;

#[derive(Parser)]
#[command(name = "facegate", version, about = "Local face enrollment and recognition")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture face samples for an identity
    Enroll {
        /// Numeric identity id
        #[arg(long)]
        id: u32,
        /// Display name (no underscores)
        #[arg(long)]
        name: String,
        /// Video source: device index, /dev/videoN, or dir:<path>
        #[arg(long)]
        source: Option<String>,
        /// Number of samples to capture
        #[arg(long)]
        samples: Option<usize>,
        /// Skip retraining after capture
        #[arg(long)]
        no_train: bool,
    },
    /// Retrain the model from the dataset
    Train,
    /// Recognize a face and record it in the access log
    Recognize {
        /// Video source: device index, /dev/videoN, or dir:<path>
        #[arg(long)]
        source: Option<String>,
        /// Acceptance threshold (lower is stricter)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// List enrolled identities
    List,
    /// Change an identity's display name
    Rename {
        #[arg(long)]
        id: u32,
        /// New display name
        #[arg(long)]
        name: String,
    },
    /// Delete an identity and all of its samples
    Delete {
        #[arg(long)]
        id: u32,
    },
    /// Show the access log
    Logs {
        /// Only the most recent N entries
        #[arg(long)]
        last: Option<usize>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Enroll {
            id,
            name,
            source,
            samples,
            no_train,
        } => {
            if let Some(source) = source {
                config.source = source;
            }
            if let Some(samples) = samples {
                config.sample_target = samples;
            }
            if no_train {
                config.train_after_enroll = false;
            }
            config.validate()?;

            println!(
                "Enrolling {id} ({name}): capturing {} samples from {}. Press Ctrl-C to stop.",
                config.sample_target, config.source
            );
            let report = run_session(config, move |gate, cancel| {
                let (source, warmup) = (gate.config().source.clone(), gate.config().warmup_frames);
                Ok(gate.enroll(id, &name, || open(&source, warmup), cancel)?)
            })
            .await?;

            match report.state {
                EnrollmentState::Complete => println!(
                    "Enrollment complete: {} new samples, {} total for {}",
                    report.captured, report.total_samples, report.identity
                ),
                EnrollmentState::Cancelled => println!(
                    "Enrollment cancelled after {} samples ({} total for {})",
                    report.captured, report.total_samples, report.identity
                ),
                other => bail!("enrollment ended in unexpected state {other:?}"),
            }
            if let Some(model) = report.model {
                println!("Model retrained with {} identities", model.label_set.len());
            }
        }
        Commands::Train => {
            let gate = admin_gate(config)?;
            let model = gate.train()?;
            println!(
                "Trained model with {} identities -> {}",
                model.label_set.len(),
                gate.config().model_path().display()
            );
        }
        Commands::Recognize { source, threshold } => {
            if let Some(source) = source {
                config.source = source;
            }
            if let Some(threshold) = threshold {
                config.acceptance_threshold = threshold;
            }
            config.validate()?;

            println!("Looking for a known face on {}. Press Ctrl-C to stop.", config.source);
            let report = run_session(config, |gate, cancel| {
                let (source, warmup) = (gate.config().source.clone(), gate.config().warmup_frames);
                Ok(gate.recognize(|| open(&source, warmup), cancel)?)
            })
            .await?;

            match (report.state, report.matched) {
                (RecognitionState::Matched, Some(m)) => println!(
                    "Recognized {} ({}) distance {:.2} at {}",
                    m.identity_id, m.display_name, m.distance, m.entry.timestamp
                ),
                (RecognitionState::Cancelled, _) => {
                    println!("Recognition cancelled after {} frames", report.frames)
                }
                (state, _) => bail!("recognition ended in unexpected state {state:?}"),
            }
        }
        Commands::List => {
            let gate = admin_gate(config)?;
            let identities = gate.list_identities()?;
            if identities.is_empty() {
                println!("No identities enrolled");
            }
            for (identity, samples) in identities {
                println!("{:>6}  {:<24} {samples} samples", identity.identity_id, identity.display_name);
            }
        }
        Commands::Rename { id, name } => {
            let gate = admin_gate(config)?;
            let identity = gate.rename_identity(id, &name)?;
            println!("Renamed to {identity}; run `facegate train` before recognizing");
        }
        Commands::Delete { id } => {
            let gate = admin_gate(config)?;
            let identity = gate.delete_identity(id)?;
            println!("Deleted {identity}; run `facegate train` before recognizing");
        }
        Commands::Logs { last } => {
            let gate = admin_gate(config)?;
            let entries = gate.access_entries()?;
            let skip = last.map_or(0, |n| entries.len().saturating_sub(n));
            for entry in entries.iter().skip(skip) {
                println!(
                    "{}  {:>6}  {}",
                    entry.timestamp.format(facegate_engine::access_log::TIMESTAMP_FORMAT),
                    entry.identity_id,
                    entry.display_name
                );
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

/// Gate for commands that never touch the detector.
fn admin_gate(config: Config) -> Result<FaceGate<(), LbphClassifier>> {
    Ok(FaceGate::new(config, (), LbphClassifier::default())?)
}

fn session_gate(config: Config) -> Result<Gate> {
    let model_path = config.detector_model_path();
    let params = DetectorParams {
        min_face_size: config.min_face_size,
        ..DetectorParams::default()
    };
    let detector = SeetaDetector::load(&model_path.to_string_lossy(), params)
        .with_context(|| format!("failed to load face detector from {}", model_path.display()))?;
    Ok(FaceGate::new(config, detector, LbphClassifier::default())?)
}

fn open(source: &str, warmup_frames: usize) -> Result<Box<dyn VideoSource>, CameraError> {
    let descriptor: SourceDescriptor = source.parse()?;
    tracing::info!(source = %descriptor, "opening video source");
    open_source(&descriptor, warmup_frames)
}

/// Run a blocking session on the blocking pool; Ctrl-C trips its cancel
/// token and the session winds down on its next tick.
async fn run_session<T, F>(config: Config, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Gate, &CancelToken) -> Result<T> + Send + 'static,
{
    let cancel = CancelToken::new();
    let mut handle = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut gate = session_gate(config)?;
            job(&mut gate, &cancel)
        })
    };

    tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, stopping session");
            cancel.cancel();
            handle.await?
        }
    }
}
