//! Redfire DTMF command line tool

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use redfire_dtmf::{
    config::AppConfig,
    protocols::{DetectedDigit, RtpReceiver, RtpSender},
    services::load_ringtone_pcm,
    utils::setup_logging,
};

#[derive(Parser)]
#[command(name = "redfire-dtmf")]
#[command(about = "RFC 2833 DTMF sender and detector")]
#[command(version = redfire_dtmf::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "REDFIRE_DTMF_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for RTP and print detected digits
    Listen {
        /// UDP port, overrides rtp.port
        #[arg(short, long)]
        port: Option<u16>,
        /// Print one JSON object per digit
        #[arg(long)]
        json: bool,
        /// Exit after this many digits
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Send digits as telephone-events
    Send {
        /// Digits to send (0-9, *, #, A-D)
        digits: String,
        /// Destination RTP address
        #[arg(short, long)]
        to: SocketAddr,
    },
    /// Write ringtone PCM (s16le) to a file
    Ringtone {
        #[arg(long, default_value = "PCMU")]
        codec: String,
        #[arg(long, default_value = "8000", value_parser = clap::value_parser!(u32).range(8000..=192_000))]
        sample_rate: u32,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration
    ValidateConfig,
    /// Generate default configuration
    GenerateConfig {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(&cli)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let _log_guard = setup_logging(&config.logging)?;
    config.validate()?;

    info!("Starting {} v{}", redfire_dtmf::NAME, redfire_dtmf::VERSION);

    match cli.command {
        Commands::Listen { port, json, count } => listen(config, port, json, count).await,
        Commands::Send { ref digits, to } => send(&config, digits, to).await,
        Commands::Ringtone { ref codec, sample_rate, ref output } => {
            write_ringtone(codec, sample_rate, output)
        }
        Commands::ValidateConfig => validate_configuration(&config),
        Commands::GenerateConfig { ref output } => generate_default_config(output.clone()),
    }
}

fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        // Logging is not up yet, so report straight to stderr
        None => Ok(AppConfig::load_from_env().unwrap_or_else(|e| {
            eprintln!(
                "{} Ignoring environment configuration: {}",
                "⚠".yellow(),
                e
            );
            AppConfig::default_config()
        })),
    }
}

async fn listen(
    mut config: AppConfig,
    port: Option<u16>,
    json: bool,
    count: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.rtp.port = port;
    }

    let receiver = RtpReceiver::bind(&config.rtp, config.dtmf.payload_type)
        .await
        .context("Failed to start RTP receiver")?;
    let local_addr = receiver.local_addr()?;

    println!(
        "{} Listening for DTMF (payload type {}) on {}",
        "✓".green(),
        config.dtmf.payload_type,
        local_addr
    );

    let (digit_tx, mut digit_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let receiver_task = tokio::spawn(receiver.run(digit_tx, cancel.clone()));

    let mut received = 0usize;
    loop {
        tokio::select! {
            digit = digit_rx.recv() => match digit {
                Some(digit) => {
                    print_digit(&digit, json)?;
                    received += 1;
                    if count.map_or(false, |limit| received >= limit) {
                        break;
                    }
                }
                None => break,
            },
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Unable to listen for shutdown signal: {}", e);
                }
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    cancel.cancel();
    let stats = receiver_task.await.context("RTP receiver task failed")?;
    if !json {
        println!(
            "{} {} packets, {} DTMF packets, {} digits",
            "■".blue(),
            stats.packets_received,
            stats.dtmf_packets,
            stats.digits_detected
        );
    }
    Ok(())
}

fn print_digit(digit: &DetectedDigit, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(digit)?);
    } else {
        println!(
            "📞 {} (ts={}, ssrc={:#010x}, from {})",
            digit.symbol.to_string().bold().yellow(),
            digit.timestamp,
            digit.ssrc,
            digit.source
        );
    }
    Ok(())
}

async fn send(config: &AppConfig, digits: &str, to: SocketAddr) -> anyhow::Result<()> {
    let mut sender = RtpSender::connect(to, &config.dtmf, &config.rtp).await?;
    let packets = sender.send_digits(digits).await?;
    println!(
        "{} Sent {} as {} telephone-event packets to {}",
        "✓".green(),
        digits.bold(),
        packets,
        to
    );
    Ok(())
}

fn write_ringtone(codec: &str, sample_rate: u32, output: &Path) -> anyhow::Result<()> {
    let pcm = load_ringtone_pcm(codec, sample_rate);
    std::fs::write(output, &pcm)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "{} Wrote {} bytes of {} Hz ringtone to {}",
        "✓".green(),
        pcm.len(),
        sample_rate,
        output.display()
    );
    Ok(())
}

fn validate_configuration(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;

    println!("{} Configuration is valid", "✓".green());
    println!("  RTP Bind: {}:{}", config.rtp.bind_address, config.rtp.port);
    println!("  Clock Rate: {} Hz, ptime {} ms", config.rtp.clock_rate, config.rtp.ptime_ms);
    println!("  DTMF Payload Type: {}", config.dtmf.payload_type);
    println!("  DTMF Redundancy: {}", config.dtmf.redundancy);
    println!("  Log Level: {}", config.logging.level);

    Ok(())
}

fn generate_default_config(output_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AppConfig::default_config();
    let toml_content = toml::to_string_pretty(&config)
        .context("Failed to serialize config")?;

    match output_path {
        Some(path) => {
            std::fs::write(&path, toml_content)?;
            println!("{} Default configuration written to: {}", "✓".green(), path.display());
        }
        None => {
            println!("{}", toml_content);
        }
    }

    Ok(())
}
