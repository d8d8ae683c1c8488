// Retune - correction-driven fine-tuning
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::prelude::*;

use retune::config::{load_config, ComputeDevice, TrainingConfig, DEFAULT_CSV_PATH};
use retune::corrections::{load_corrections, CorrectionStore};
use retune::pipeline::{Pipeline, PipelineEvent, ProgressSink, StageStatus, TracingSink};
use retune::training::inspect_artifact;

#[derive(Parser, Debug)]
#[command(name = "retune")]
#[command(about = "Fine-tune a text classifier from reviewer corrections", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Fine-tune the base model on the correction table
    Train(TrainArgs),
    /// Append a reviewer correction to the table
    Correct {
        /// Text that was misclassified
        #[arg(long)]
        text: String,
        /// Correct label
        #[arg(long)]
        label: String,
        /// Correction table path
        #[arg(long, default_value = DEFAULT_CSV_PATH)]
        csv: PathBuf,
    },
    /// Verify a fine-tuned artifact directory and print its metadata
    Inspect {
        /// Artifact directory
        dir: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct TrainArgs {
    /// TOML file with training settings (flags override it)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Base model directory
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Hub repository to use when the base model directory cannot be loaded
    #[arg(long)]
    hub_fallback: Option<String>,
    /// Fresh directory for the fine-tuned model
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Correction table [default: active_learning_data.csv]
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Number of epochs [default: 3]
    #[arg(long)]
    epochs: Option<usize>,
    /// Batch size [default: 8]
    #[arg(long)]
    batch_size: Option<usize>,
    /// Learning rate [default: 2e-5]
    #[arg(long)]
    learning_rate: Option<f64>,
    /// Max token length [default: 256]
    #[arg(long)]
    max_length: Option<usize>,
    /// Shuffle seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
    /// Compute device: auto, cpu, cuda, metal
    #[arg(long)]
    device: Option<ComputeDevice>,
}

impl TrainArgs {
    fn into_config(self) -> Result<TrainingConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(v) = self.model_dir {
            config.model_dir = v;
        }
        if let Some(v) = self.hub_fallback {
            config.hub_fallback = Some(v);
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.csv {
            config.csv_path = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.max_length {
            config.max_length = v;
        }
        if let Some(v) = self.seed {
            config.seed = Some(v);
        }
        if let Some(v) = self.device {
            config.device = v;
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();
    let result = match args.command {
        Command::Train(train) => run_train(train),
        Command::Correct { text, label, csv } => run_correct(&text, &label, csv),
        Command::Inspect { dir } => run_inspect(dir),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\nError: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run_train(args: TrainArgs) -> Result<ExitCode> {
    let config = args.into_config()?;
    println!("Fine-tuning {} on {}", config.model_dir.display(), config.csv_path.display());

    // Bars on a terminal, log lines otherwise
    let console = ConsoleProgress::default();
    let progress: &dyn ProgressSink = if std::io::stdout().is_terminal() {
        &console
    } else {
        &TracingSink
    };
    let pipeline = Pipeline::new(config, progress)?;

    match pipeline.run() {
        Ok(outcome) => {
            print_records(&outcome.records);
            println!(
                "\nModel saved to {} ({} labels: {})",
                outcome.artifact.output_dir.display(),
                outcome.label_space.len(),
                outcome.label_space.labels().join(", ")
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            print_records(&failure.records);
            eprintln!("\nFailed at stage '{}' ({})", failure.stage, failure.error.kind());
            eprintln!("{}", failure.error);
            Ok(ExitCode::from(1))
        }
    }
}

fn print_records(records: &[retune::pipeline::StageRecord]) {
    println!();
    for record in records {
        let mark = match record.status {
            StageStatus::Succeeded => "✓",
            StageStatus::Failed => "✗",
        };
        // Failure details are printed separately in full
        let detail = record.detail.lines().next().unwrap_or_default();
        println!(
            "{} {:<20} {:>8.1}s  {}",
            mark,
            record.stage.name(),
            record.elapsed.as_secs_f64(),
            detail
        );
    }
}

fn run_correct(text: &str, label: &str, csv: PathBuf) -> Result<ExitCode> {
    let store = CorrectionStore::new(csv);
    store
        .append(text, label)
        .with_context(|| format!("Failed to record correction in {}", store.path().display()))?;

    let validated = load_corrections(store.path())?;
    println!(
        "✓ Recorded correction ({} usable rows in {})",
        validated.len(),
        store.path().display()
    );
    for entry in &validated.report.label_counts {
        println!("  • {}: {}", entry.label, entry.count);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_inspect(dir: PathBuf) -> Result<ExitCode> {
    let inspection = inspect_artifact(&dir)?;
    let metadata = &inspection.metadata;

    println!("✓ {} is a complete artifact", inspection.dir.display());
    println!("  created:        {}", metadata.created);
    println!("  source model:   {}", metadata.source_model);
    println!("  model type:     {}", metadata.model_type);
    println!("  device:         {}", metadata.device);
    println!(
        "  training:       {} samples, {} epochs, batch {}, lr {}, max length {}",
        metadata.training_samples,
        metadata.training_epochs,
        metadata.batch_size,
        metadata.learning_rate,
        metadata.max_length
    );
    println!(
        "  weights:        {} tensors, {} parameters, {:.1} MB",
        inspection.tensor_count,
        inspection.parameter_count,
        inspection.weights_bytes as f64 / 1_048_576.0
    );
    println!("  labels ({}):", inspection.label_space.len());
    for (id, label) in inspection.label_space.labels().iter().enumerate() {
        println!("    {}: {}", id, label);
    }
    Ok(ExitCode::SUCCESS)
}

/// Renders pipeline events on the terminal
#[derive(Default)]
struct ConsoleProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressSink for ConsoleProgress {
    fn emit(&self, event: PipelineEvent) {
        let Ok(mut bar) = self.bar.lock() else {
            return;
        };

        match event {
            PipelineEvent::StageStarted { stage } => println!("\n▶ {}", stage),
            PipelineEvent::FallbackUsed { source, failed } => {
                println!(
                    "  ⚠ using fallback base model {} ({} failed)",
                    source,
                    failed.join(", ")
                );
                println!("    its labels may not match the correction labels");
            }
            PipelineEvent::DownloadingFile { repo_id, file } => {
                println!("  ↓ {}/{}", repo_id, file)
            }
            PipelineEvent::LabelSummary { labels } => {
                for (label, count) in labels {
                    println!("  • {}: {}", label, count);
                }
            }
            PipelineEvent::EpochStarted { epoch, epochs, batches } => {
                let pb = ProgressBar::new(batches as u64);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("[{elapsed_precise}] {prefix} {bar:40.cyan/blue} {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=>-"),
                );
                pb.set_prefix(format!("epoch {}/{}", epoch, epochs));
                *bar = Some(pb);
            }
            PipelineEvent::BatchFinished { running_loss, lr, .. } => {
                if let Some(pb) = bar.as_ref() {
                    pb.set_message(format!("loss {:.4} lr {:.2e}", running_loss, lr));
                    pb.inc(1);
                }
            }
            PipelineEvent::EpochFinished { mean_loss, .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message(format!("mean loss {:.4}", mean_loss));
                }
            }
            PipelineEvent::ArtifactFile { path } => println!("  ✓ {}", path.display()),
            PipelineEvent::StageFailed { .. } => {
                if let Some(pb) = bar.take() {
                    pb.abandon();
                }
            }
            PipelineEvent::StageFinished { .. } => {}
        }
    }
}

/// Initialize tracing: stderr output, RUST_LOG filter, RETUNE_DEBUG=1 for debug
fn init_tracing() {
    let show_debug = std::env::var("RETUNE_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let default_level = if show_debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Bridge log crate → tracing (hf-hub, tokenizers)
    tracing_log::LogTracer::init().ok();
}
