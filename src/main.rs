//! CLI Entry Point for spce-daq
//!
//! Provides command-line interface for:
//! - One-shot controller queries (model, pressure, raw replies)
//! - Continuous acquisition into the CSV store
//! - Summaries of an existing store
//!
//! # Usage
//!
//! Identify the controller:
//! ```bash
//! spce-daq --port /dev/ttyUSB0 identify
//! ```
//!
//! Record pressure until Ctrl+C:
//! ```bash
//! spce-daq acquire --output run/pressure.csv
//! ```
//!
//! Labels/values JSON for a plot:
//! ```bash
//! spce-daq summary run/pressure.csv --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spce_daq::acquisition::AcquisitionLoop;
use spce_daq::config::{DaqConfig, DEFAULT_CONFIG_PATH};
use spce_daq::data::series::load_series;
use spce_daq::data::storage::CsvSink;
use spce_daq::hardware::{SpceController, TransportSession};
use spce_daq::logging::{self, LoggingConfig, OutputFormat};
use std::path::PathBuf;
use tokio::signal;

#[derive(Parser)]
#[command(name = "spce-daq")]
#[command(about = "DIGITEL SPCe pressure client and logger", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overriding the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the controller model
    Identify,

    /// Print one pressure reading
    Read,

    /// Send an opcode (hex, e.g. 0B) and print the unvalidated reply
    Raw {
        /// Opcode in hexadecimal
        #[arg(value_parser = parse_opcode)]
        opcode: u8,
    },

    /// Poll the controller and append readings until Ctrl+C
    Acquire {
        /// CSV store, overriding the configuration
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Summarise a CSV store
    Summary {
        /// CSV store (defaults to the configured output path)
        path: Option<PathBuf>,

        /// Print `{labels, values}` JSON instead of statistics
        #[arg(long)]
        json: bool,
    },
}

fn parse_opcode(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid opcode '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaqConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if let Commands::Acquire {
        output: Some(output),
    } = &cli.command
    {
        config.storage.output_path = output.clone();
    }
    config.validate().context("invalid configuration")?;

    let logging_config = LoggingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    logging::init(logging_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Identify => identify(&config).await,
        Commands::Read => read(&config).await,
        Commands::Raw { opcode } => raw(&config, opcode).await,
        Commands::Acquire { .. } => acquire(&config).await,
        Commands::Summary { path, json } => {
            summary(path.unwrap_or_else(|| config.storage.output_path.clone()), json)
        }
    }
}

async fn connect(config: &DaqConfig) -> Result<SpceController> {
    let settings = config.serial_settings();
    let session = TransportSession::open(&settings)
        .await
        .with_context(|| format!("opening {}", settings.port))?;
    Ok(SpceController::new(session, config.serial.address))
}

async fn identify(config: &DaqConfig) -> Result<()> {
    let mut spce = connect(config).await?;
    let model = spce.identify().await.context("identify failed")?;
    println!("Model: {}", model);
    spce.close().await?;
    Ok(())
}

async fn read(config: &DaqConfig) -> Result<()> {
    let mut spce = connect(config).await?;
    let pressure = spce.read_pressure().await.context("pressure read failed")?;
    println!("Pressure: {}", pressure);
    spce.close().await?;
    Ok(())
}

async fn raw(config: &DaqConfig, opcode: u8) -> Result<()> {
    let mut spce = connect(config).await?;
    let reply = spce.send_raw(opcode).await?;
    println!("RAW: {}", reply);
    spce.close().await?;
    Ok(())
}

async fn acquire(config: &DaqConfig) -> Result<()> {
    let spce = connect(config).await?;
    let sink = CsvSink::new(&config.storage.output_path);

    println!("📡 Acquiring from {} into {}", config.serial.port, sink.path().display());
    println!("   Press Ctrl+C to stop");

    let mut acquisition = AcquisitionLoop::new(spce, sink, config.acquisition_settings());
    let stop = acquisition.stop_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Stop requested, finishing current tick...");
        }
        stop.stop();
    });

    let result = acquisition.run().await;
    let stats = acquisition.stats();
    if let Err(e) = acquisition.into_gauge().close().await {
        eprintln!("   Warning: port shutdown failed: {}", e);
    }

    result.context("acquisition stopped")?;
    println!(
        "👋 Stored {} of {} readings ({} timeouts/bad frames, {} rejected)",
        stats.records, stats.ticks, stats.decode_failures, stats.rejected
    );
    Ok(())
}

fn summary(path: PathBuf, json: bool) -> Result<()> {
    let series =
        load_series(&path).with_context(|| format!("reading store {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string(&series)?);
        return Ok(());
    }

    match series.summary() {
        Some(s) => {
            println!("Store:  {}", path.display());
            println!("Points: {}", s.points);
            println!("Span:   {} .. {}", s.first, s.last);
            println!("Min:    {:.3E}", s.min);
            println!("Max:    {:.3E}", s.max);
        }
        None => println!("Store {} has no valid readings", path.display()),
    }
    Ok(())
}
