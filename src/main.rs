//! CLI Entry Point for weather-daq
//!
//! # Usage
//!
//! Run the station on real hardware (requires the `rpi` feature):
//! ```bash
//! weather-daq run --config config/station.toml
//! ```
//!
//! Run against the built-in simulator:
//! ```bash
//! weather-daq run --simulate
//! ```
//!
//! Show the newest logged records:
//! ```bash
//! weather-daq history --last 20
//! ```
//!
//! Validate and print the effective configuration:
//! ```bash
//! weather-daq check-config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use weather_daq::acquisition::{
    shutdown_channel, AcquisitionScheduler, StationSinks, TaskOutcome,
};
use weather_daq::config::StationConfig;
use weather_daq::data::history::HistoricalSource;
use weather_daq::data::storage::CsvSink;
use weather_daq::data::{LogRecord, ParticulateRecord};
use weather_daq::hardware::open_station_hardware;
use weather_daq::hardware::simulator::SimulatedStation;
use weather_daq::tracing_setup;

#[derive(Parser)]
#[command(name = "weather-daq")]
#[command(about = "Weather station data acquisition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire until Ctrl-C or SIGTERM
    Run {
        /// Configuration file (default: config/station.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the simulated station instead of real hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Print the newest records of the station log
    History {
        /// Configuration file (default: config/station.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of records to show
        #[arg(long, default_value = "10")]
        last: usize,
    },

    /// Validate the configuration and print the effective values
    CheckConfig {
        /// Configuration file (default: config/station.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, simulate } => {
            let config = load_config(config.as_deref())?;
            run_station(config, simulate).await
        }
        Commands::History { config, last } => {
            let config = load_config(config.as_deref())?;
            show_history(&config, last)
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&config)?);
            println!("# configuration is valid");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StationConfig> {
    let config = match path {
        Some(path) => StationConfig::load_from(path),
        None => StationConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_station(config: StationConfig, simulate: bool) -> Result<()> {
    tracing_setup::init_from_config(&config)?;
    info!(station = %config.application.name, simulate, "starting weather station");

    let sinks = StationSinks {
        station: Box::new(
            CsvSink::<LogRecord>::open(&config.storage.station_log)
                .context("Failed to open station log")?,
        ),
        particulate: Box::new(
            CsvSink::<ParticulateRecord>::open(&config.storage.particulate_log)
                .context("Failed to open particulate log")?,
        ),
    };

    let (simulator_trigger, simulator_signal) = shutdown_channel();
    let (hardware, simulator) = if simulate {
        let (simulator, hardware) = SimulatedStation::new(&config)?;
        (hardware, Some(tokio::spawn(simulator.run(simulator_signal))))
    } else {
        let hardware =
            open_station_hardware(&config).context("Failed to open station hardware")?;
        (hardware, None)
    };

    let station = AcquisitionScheduler::new(config, hardware, sinks).start()?;
    let report = station.run_until(shutdown_signal()).await;

    simulator_trigger.trigger();
    if let Some(simulator) = simulator {
        simulator.await.context("Simulator task panicked")??;
    }

    for (task, outcome) in &report.outcomes {
        match outcome {
            TaskOutcome::Completed => info!(%task, "stopped cleanly"),
            TaskOutcome::Failed(e) => warn!(%task, error = %e, "ended with error"),
            TaskOutcome::Aborted => warn!(%task, "aborted at shutdown"),
        }
    }
    info!("weather station stopped");
    Ok(())
}

fn show_history(config: &StationConfig, last: usize) -> Result<()> {
    let history = HistoricalSource::load(&config.storage.station_log).with_context(|| {
        format!(
            "Failed to read station log {}",
            config.storage.station_log.display()
        )
    })?;

    println!(
        "{:<26} {:>8} {:>8} {:<10} {:>7} {:>8} {:>6} {:>7} {:>7}",
        "timestamp", "wind", "rain", "direction", "temp", "press", "hum", "pm10", "pm2.5"
    );
    for record in history.last(last) {
        println!(
            "{:<26} {:>8.2} {:>8.2} {:<10} {:>7} {:>8} {:>6} {:>7} {:>7}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.wind_speed_kmh,
            record.rainfall_mm,
            record.direction.to_string(),
            cell(record.temperature_c),
            cell(record.pressure_hpa),
            cell(record.humidity_pct),
            cell(record.pm10),
            cell(record.pm25),
        );
    }
    println!(
        "{} of {} records from {} shown ({} unreadable rows skipped)",
        history.last(last).len(),
        history.len(),
        history.path().display(),
        history.skipped()
    );
    Ok(())
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    futures::pin_mut!(ctrl_c, terminate);
    futures::future::select(ctrl_c, terminate).await;
}
