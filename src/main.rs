//! CLI entry point for tiger-rig
//!
//! Drives a Tiger controller over its serial line:
//! - raw commands and autofocus/piezo queries
//! - trigger programming and the global shutter
//! - a complete triggered acquisition run
//!
//! # Usage
//!
//! ```bash
//! tiger-rig --port /dev/ttyUSB0 focus status
//! tiger-rig triggers --exposure-ms 20
//! tiger-rig run --exposure-ms 20 --duration-ms 5000
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tiger_rig::acquisition::AcquisitionState;
use tiger_rig::config::{RigConfig, DEFAULT_CONFIG_PATH};
use tiger_rig::logging::{self, OutputFormat, TracingConfig};
use tiger_rig::transport::SerialTransport;
use tiger_rig::Rig;

#[derive(Parser)]
#[command(name = "tiger-rig")]
#[command(about = "Command line control of an ASI Tiger microscope rig", long_about = None)]
struct Cli {
    /// Rig configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overrides the configuration
    #[arg(long)]
    port: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "compact")]
    log_format: OutputFormat,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a raw command through the hub and print the reply
    Send {
        /// Command line without terminator, e.g. "PZINFO"
        command: String,
    },

    /// Autofocus (CRISP) control
    Focus {
        #[command(subcommand)]
        action: FocusAction,
    },

    /// Report the piezo operating mode
    PiezoMode,

    /// Open or close the global shutter
    Shutter {
        #[arg(value_enum)]
        action: ShutterAction,
    },

    /// Program camera and laser NRT pulses
    Triggers {
        #[arg(long)]
        exposure_ms: f64,
    },

    /// Program a hardware z-stack
    Zstack {
        #[arg(long)]
        step_um: f64,
        #[arg(long)]
        slices: u32,
    },

    /// Run one triggered acquisition; Ctrl-C cancels
    Run {
        #[arg(long)]
        exposure_ms: f64,
        /// How long the host sequence lasts before it is finished
        #[arg(long, default_value = "1000")]
        duration_ms: u64,
    },
}

#[derive(Subcommand)]
enum FocusAction {
    /// State and signal-to-noise ratio
    Status,
    /// Lock and wait for the loop to settle
    Lock {
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
    Unlock,
}

#[derive(Clone, Copy, ValueEnum)]
enum ShutterAction {
    Open,
    Close,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RigConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.port.clone() {
        config.transport.port = port;
    }
    config.validate()?;

    let tracing_config = TracingConfig::from_rig_config(&config)
        .map_err(|e| anyhow!(e))?
        .with_format(cli.log_format);
    logging::init(tracing_config).map_err(|e| anyhow!(e))?;

    let transport = SerialTransport::open(
        &config.transport.port,
        config.transport.baud_rate,
        config.transport.read_timeout(),
    )
    .await?;
    info!(port = %transport.port_name(), "Connected");

    let rig = Rig::from_config(Arc::new(transport), &config)?;

    match cli.command {
        Commands::Send { command } => {
            let reply = rig.hub().send(&command).await?;
            print_result(cli.json, json!({ "command": command, "reply": reply }), &reply);
        }
        Commands::Focus { action } => focus(&rig, action, cli.json).await?,
        Commands::PiezoMode => {
            let mode = rig.piezo().operating_mode().await?;
            print_result(
                cli.json,
                json!({ "axis": rig.piezo().axis().as_str(), "mode": format!("{mode:?}"), "code": mode.code() }),
                &format!("{mode:?}"),
            );
        }
        Commands::Shutter { action } => match action {
            ShutterAction::Open => rig.triggers().open_global_shutter().await?,
            ShutterAction::Close => rig.triggers().close_global_shutter().await?,
        },
        Commands::Triggers { exposure_ms } => {
            let settings = config.acquisition.with_exposure(exposure_ms);
            settings.validate()?;
            rig.triggers().program_nrt_pulses(&settings).await?;
        }
        Commands::Zstack { step_um, slices } => {
            rig.stage().setup_z_stack(step_um, slices).await?;
        }
        Commands::Run {
            exposure_ms,
            duration_ms,
        } => run(&rig, exposure_ms, Duration::from_millis(duration_ms), cli.json).await?,
    }

    Ok(())
}

async fn focus(rig: &Rig, action: FocusAction, as_json: bool) -> Result<()> {
    let tracker = rig.focus();
    match action {
        FocusAction::Status => {
            let snapshot = tracker.snapshot().await?;
            print_result(
                as_json,
                json!({
                    "state": snapshot.state.to_string(),
                    "code": snapshot.state.code(),
                    "signal_to_noise": snapshot.signal_to_noise,
                }),
                &format!(
                    "{} (SNR {:.1})",
                    snapshot.state, snapshot.signal_to_noise
                ),
            );
        }
        FocusAction::Lock { timeout_ms } => {
            tracker
                .lock_and_wait(Duration::from_millis(timeout_ms))
                .await?;
        }
        FocusAction::Unlock => tracker.commands().unlock().await?,
    }
    Ok(())
}

async fn run(rig: &Rig, exposure_ms: f64, duration: Duration, as_json: bool) -> Result<()> {
    let sequencer = rig.sequencer();
    let mut events = sequencer.subscribe();

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if as_json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                }
            } else {
                println!("{} -> {}", event.from, event.to);
            }
            if event.to.is_terminal() {
                break;
            }
        }
    });

    let started = sequencer.on_sequence_started(exposure_ms).await?;
    if started == AcquisitionState::Acquiring {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                sequencer.on_sequence_finished(None).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling run");
                sequencer.cancel().await?;
            }
        }
    }

    printer.await?;
    Ok(())
}

fn print_result(as_json: bool, value: serde_json::Value, text: &str) {
    if as_json {
        println!("{value}");
    } else {
        println!("{text}");
    }
}
