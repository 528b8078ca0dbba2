//! Synth GW - Rust implementation
//!
//! Streams raw MIDI byte captures from DOS-era programs to an external
//! synthesizer, with MT-32 sysex pacing.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synth_gw::capture::{FileCapture, LogCapture};
use synth_gw::config::{self, AppConfig, CaptureConfig};
use synth_gw::drivers::{midiport, open_sink};
use synth_gw::gateway::MidiGateway;

/// Synth GW - Deliver raw MIDI byte streams from DOS-era programs to external synthesizers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI output ports
    #[arg(long)]
    list_ports: bool,

    /// Raw MIDI byte file to stream through the gateway
    #[arg(long, value_name = "FILE")]
    play: Option<PathBuf>,

    /// Output device override (auto, port, console, none)
    #[arg(long)]
    device: Option<String>,

    /// Output port pattern override (substring or index)
    #[arg(long)]
    port: Option<String>,

    /// Force sysex pacing on
    #[arg(long)]
    delay_sysex: bool,

    /// Trace each delivered message to the log
    #[arg(long)]
    sniff: bool,

    /// Record raw delivered bytes to FILE
    #[arg(long, value_name = "FILE")]
    capture_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting Synth GW...");

    if args.list_ports {
        list_ports_formatted();
        return Ok(());
    }

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);

    let Some(play_path) = args.play.as_ref() else {
        println!(
            "Nothing to do. Use {} to stream a raw MIDI byte file or {} to enumerate devices.",
            "--play <FILE>".bold(),
            "--list-ports".bold()
        );
        return Ok(());
    };

    play_file(play_path, &config, args.sniff)
}

fn play_file(path: &Path, config: &AppConfig, sniff: bool) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read raw MIDI file {}", path.display()))?;
    info!("Streaming {} bytes from {}", bytes.len(), path.display());

    let sink = open_sink(&config.midi.device, &config.midi.conf);
    let mut gateway = MidiGateway::new(sink, config.midi.delay_sysex);
    if config.midi.delay_sysex {
        info!("MIDI: using delayed SysEx processing");
    }

    if let Some(capture) = &config.capture {
        if capture.enabled {
            gateway.set_capture(Box::new(FileCapture::create(&capture.path)?));
        }
    } else if sniff {
        gateway.set_capture(Box::new(LogCapture::new()));
    }

    for byte in bytes {
        gateway.ingest(byte);
    }
    gateway.close();

    info!("Stream complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let path = Path::new(&args.config);
    if path.exists() {
        let config = config::load(path)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    } else if args.config != "config.yaml" {
        anyhow::bail!("config file {} not found", args.config)
    } else {
        // No config file: defaults plus CLI overrides
        Ok(AppConfig::default())
    }
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(device) = &args.device {
        config.midi.device = device.clone();
    }
    if let Some(port) = &args.port {
        config.midi.conf = port.clone();
    }
    if args.delay_sysex {
        config.midi.delay_sysex = true;
    }
    if let Some(path) = &args.capture_file {
        config.capture = Some(CaptureConfig {
            enabled: true,
            path: path.to_string_lossy().into_owned(),
        });
    }
}

fn list_ports_formatted() {
    println!("\n{}", "=== Available MIDI Output Ports ===".bold().cyan());

    match midiport::list_output_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("  {}", "No output ports found".dimmed());
        }
        Ok(ports) => {
            for (index, name) in ports.iter().enumerate() {
                println!("  [{}] {}", index, name);
            }
        }
        Err(e) => {
            println!("  {}", format!("Port enumeration failed: {}", e).red());
        }
    }

    println!();
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
