use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use marlene::voice::{AudioDevice, CpalDevice, GateOptions, TranscriptKeywordDetector};
use marlene::{Assistant, Config};

/// Marlene - wake-word voice assistant
#[derive(Parser)]
#[command(name = "marlene", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "MARLENE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for the wake word and start a session per detection (default)
    Run,
    /// Start one session right away, without a wake word
    Talk,
    /// List audio input and output devices
    Devices,
    /// Print the resolved configuration with secrets redacted
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,marlene=info",
        1 => "info,marlene=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Run);
    if matches!(command, Command::Devices) {
        return list_devices();
    }

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(source = ?config.source, "loaded configuration");

    match command {
        Command::Run => run_assistant(&config).await,
        Command::Talk => talk(&config).await,
        Command::CheckConfig => {
            println!("{}", config.redacted()?);
            Ok(())
        }
        Command::Devices => list_devices(),
    }
}

async fn run_assistant(config: &Config) -> anyhow::Result<()> {
    let detector =
        TranscriptKeywordDetector::from_config(&config.wake, config.api_keys.deepgram.as_ref())?;
    let assistant = Assistant::from_config(config)?;
    let options = GateOptions {
        channels: config.audio.input_channels,
        poll_interval: config.wake.poll_interval(),
    };

    tracing::info!(
        keywords = ?config.wake.keywords,
        mode = %config.agent.mode,
        "marlene ready - say \"{}\"",
        config.wake.keywords.first().map_or("", String::as_str)
    );

    assistant
        .run(Box::new(detector), options, ctrl_c())
        .await?;
    Ok(())
}

async fn talk(config: &Config) -> anyhow::Result<()> {
    let assistant = Assistant::from_config(config)?;
    let summary = assistant.talk(ctrl_c()).await?;

    println!(
        "Session {} ended ({}) after {:.1}s: {} frames sent, {} audio chunks received, {} tool calls",
        summary.id,
        summary.reason,
        summary.duration.as_secs_f32(),
        summary.frames_sent,
        summary.audio_chunks_received,
        summary.tool_calls
    );
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let devices = CpalDevice::list_devices()?;
    if devices.is_empty() {
        println!("No audio devices found");
        return Ok(());
    }

    for device in &devices {
        let direction = if device.is_input { "input " } else { "output" };
        let rate = device
            .default_rate
            .map_or_else(|| "unknown".to_string(), |r| format!("{r} Hz"));
        println!(
            "[{direction}] {} ({rate}, {} ch)",
            device.name, device.max_channels
        );
    }

    match CpalDevice::new(true).native_input_rate() {
        Ok(rate) => println!("\nSelected input rate: {rate} Hz"),
        Err(e) => println!("\nCould not detect input rate: {e}"),
    }
    Ok(())
}

/// Resolve on Ctrl-C; a broken signal handler is logged and never resolves
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
