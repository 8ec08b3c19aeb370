use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use blow_detector::engine::{list_input_devices, CaptureBackend, CpalBackend, WavReplayBackend};
use blow_detector::{BlowDetector, BlowEvent, DetectorConfig, DetectorStatus, ErrorCode};
use clap::{Parser, Subcommand};
use serde::Serialize;

/// Exit code used when the microphone could not be acquired
const EXIT_ACQUISITION_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "blow_cli", about = "Detect blows into the microphone")]
struct Cli {
    /// JSON config file (defaults to assets/blow_config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen on the default input device and print blow events
    Listen {
        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long)]
        seconds: Option<u64>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        sensitivity: Option<f32>,
    },
    /// Run a WAV recording through the detector at real-time cadence
    Replay {
        #[arg(long)]
        wav: PathBuf,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        sensitivity: Option<f32>,
    },
    /// List input devices on the default host
    Devices,
}

/// One JSON line on stdout
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputLine<'a> {
    Blow(&'a BlowEvent),
    Status(&'a DetectorStatus),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .map(DetectorConfig::load_from_file)
        .unwrap_or_else(DetectorConfig::load);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match cli.command {
        Commands::Listen {
            seconds,
            threshold,
            sensitivity,
        } => {
            let config = apply_tuning(config, threshold, sensitivity);
            runtime.block_on(run_detector(
                config,
                Arc::new(CpalBackend::new()),
                seconds.map(Duration::from_secs),
            ))
        }
        Commands::Replay {
            wav,
            threshold,
            sensitivity,
        } => {
            let config = apply_tuning(config, threshold, sensitivity);
            runtime.block_on(run_detector(
                config,
                Arc::new(WavReplayBackend::new(&wav)),
                None,
            ))
        }
        Commands::Devices => run_devices(),
    }
}

fn apply_tuning(
    mut config: DetectorConfig,
    threshold: Option<f32>,
    sensitivity: Option<f32>,
) -> DetectorConfig {
    if let Some(threshold) = threshold {
        config.detection.threshold = threshold;
    }
    if let Some(sensitivity) = sensitivity {
        config.detection.sensitivity = sensitivity;
    }
    config
}

async fn run_detector(
    config: DetectorConfig,
    backend: Arc<dyn CaptureBackend>,
    limit: Option<Duration>,
) -> Result<ExitCode> {
    let (detector, mut events) = BlowDetector::builder()
        .config(config)
        .backend(backend)
        .build()
        .context("invalid detector configuration")?;

    detector.start().await;
    if let Some(err) = detector.last_error() {
        eprintln!("{} (code {})", err.message(), err.code());
        return Ok(ExitCode::from(EXIT_ACQUISITION_FAILED));
    }
    print_line(&OutputLine::Status(&detector.status()))?;

    let mut status = detector.subscribe_status();
    let mut listening = status.borrow().is_listening;
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    while listening {
        tokio::select! {
            Some(event) = events.recv() => print_line(&OutputLine::Blow(&event))?,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                listening = status.borrow_and_update().is_listening;
            }
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    detector.stop();
    // Events fired on the last frames are still queued
    while let Ok(event) = events.try_recv() {
        print_line(&OutputLine::Blow(&event))?;
    }
    print_line(&OutputLine::Status(&detector.status()))?;
    Ok(ExitCode::from(0))
}

fn run_devices() -> Result<ExitCode> {
    match list_input_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("No input devices found");
            Ok(ExitCode::from(0))
        }
        Ok(devices) => {
            for device in &devices {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{}{marker}", device.name);
            }
            Ok(ExitCode::from(0))
        }
        Err(refusal) => {
            eprintln!("Could not enumerate input devices: {refusal:?}");
            Ok(ExitCode::from(EXIT_ACQUISITION_FAILED))
        }
    }
}

fn print_line(line: &OutputLine<'_>) -> Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}
