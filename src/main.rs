//! CLI Entry Point for focus-recorder
//!
//! Provides command-line interface for:
//! - Recording one EEG session with operator attention labels
//! - Listing the label key bindings
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! focus-recorder record --subject s01 --run 1
//! focus-recorder record --dry-run
//! focus-recorder config --config config/recorder.toml
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use focus_recorder::config::{RecorderConfig, DEFAULT_CONFIG_PATH};
use focus_recorder::core::{Label, LabelEvent, SessionId};
use focus_recorder::data::storage::{
    CsvSessionWriter, MemorySessionWriter, SessionPaths, SessionWriter,
};
use focus_recorder::hardware::{KeySource, SampleSource, StdinKeySource, SyntheticBoard};
use focus_recorder::session::{SessionController, SessionOptions};
use focus_recorder::telemetry;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[command(name = "focus-recorder")]
#[command(about = "Record EEG with operator-tagged attention labels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one session until Ctrl+C
    Record {
        /// Subject identifier (prompted for if omitted)
        #[arg(long)]
        subject: Option<String>,

        /// Run number (prompted for if omitted)
        #[arg(long)]
        run: Option<u32>,

        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Output directory, overrides `storage.output_dir`
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Keep datasets in memory instead of writing files
        #[arg(long)]
        dry_run: bool,
    },

    /// List the label key bindings
    Keys,

    /// Print the effective configuration
    Config {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            subject,
            run,
            config,
            output_dir,
            dry_run,
        } => record(subject, run, config, output_dir, dry_run).await,
        Commands::Keys => {
            for label in Label::ALL {
                println!("{}  {}", label.key(), label);
            }
            Ok(())
        }
        Commands::Config { config } => {
            let config = RecorderConfig::load_from(&config)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn record(
    subject: Option<String>,
    run: Option<u32>,
    config_path: PathBuf,
    output_dir: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let mut config = RecorderConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(dir) = output_dir {
        config.storage.output_dir = dir;
    }
    telemetry::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let subject = match subject {
        Some(subject) => subject,
        None => prompt("Enter subject ID: ")?,
    };
    let run = match run {
        Some(run) => run,
        None => prompt("Enter run number: ")?
            .parse()
            .context("run number must be a non-negative integer")?,
    };
    let session = SessionId::new(subject, run)?;

    let device = &config.device;
    let source: Arc<dyn SampleSource> = Arc::new(SyntheticBoard::new(
        device.eeg_channels,
        device.aux_channels,
        device.sample_rate_hz,
    ));
    let keys: Arc<dyn KeySource> = Arc::new(StdinKeySource::new());
    let writer: Arc<dyn SessionWriter> = if dry_run {
        Arc::new(MemorySessionWriter::new())
    } else {
        Arc::new(
            CsvSessionWriter::new(
                SessionPaths::new(&config.storage.output_dir),
                device.eeg_channels,
                device.aux_channels,
            )
            .with_manifest(config.storage.write_manifest),
        )
    };

    println!("Recording {}", session);
    println!("{}", source.describe());
    println!("{} (type the key, then Enter). Ctrl+C to stop.", Label::instructions());

    let controller = SessionController::new(
        session,
        SessionOptions::from_config(&config.acquisition),
        source,
        keys,
        writer,
    )
    .with_label_observer(Arc::new(|event: &LabelEvent| {
        println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), event.label);
    }));

    let termination = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        println!("\nStopping recording...");
    };
    let report = controller.run(termination).await?;

    for dataset in &report.datasets {
        println!("{}", dataset.message());
    }
    if let Some(manifest) = &report.manifest {
        println!("Session manifest saved to {}", manifest);
    }
    for producer in &report.abandoned {
        println!("Warning: {} did not stop in time; its data ends at the last appended row", producer);
    }
    println!("Recording stopped: {}", report.stop_reason);

    report.into_result()?;
    Ok(())
}

fn prompt(question: &str) -> Result<String> {
    print!("{}", question);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
