//! Runner binary for the macrosim kernel.
//!
//! Loads configuration, builds the Circuit with the demonstration economy,
//! and runs it to its horizon or until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `macrosim-config.yaml` (or `MACROSIM_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the Circuit and register firms, households and banks
//! 4. Attach the tracing and broadcast event sinks
//! 5. Install the Ctrl-C handler that raises the abort flag
//! 6. Run on a blocking task
//! 7. Log the outcome and headline metrics
//! 8. Write the series table to `MACROSIM_EXPORT` if set

mod error;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use macrosim_core::{Circuit, SimulationConfig};
use macrosim_events::{BroadcastSink, TracingSink};
use macrosim_sectors::{EconomyConfig, build_economy};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "MACROSIM_CONFIG";

/// Environment variable naming the JSON export destination.
const EXPORT_ENV: &str = "MACROSIM_EXPORT";

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG: &str = "macrosim-config.yaml";

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Metrics logged when the run ends.
const HEADLINE_METRICS: [&str; 6] = [
    "firms.output",
    "firms.price.average",
    "households.unemployment_rate",
    "ledger.loans",
    "banks.equity",
    "circuit.agent_failures",
];

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the Circuit or the export fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let path = config_path();
    let (config, economy) = load_config(&path)?;

    // 2. Initialize structured logging.
    init_tracing(&config);
    info!(
        config = %path.display(),
        world_name = config.world.name,
        seed = config.world.seed,
        horizon = config.time.horizon_periods,
        "macrosim-engine starting"
    );

    // 3. Build the Circuit.
    let mut circuit = Circuit::new(&config)?;
    for sector in build_economy(&economy) {
        circuit.register_sector(sector)?;
    }
    info!(
        run_id = %circuit.run_id(),
        sectors = ?circuit.sector_names(),
        firms = economy.firms.count,
        households = economy.households.count,
        banks = economy.banks.count,
        "Economy registered"
    );

    // 4. Event sinks.
    circuit.subscribe(Box::new(TracingSink));
    let broadcast = BroadcastSink::new(EVENT_CHANNEL_CAPACITY);
    let mut events = broadcast.subscribe();
    circuit.subscribe(Box::new(broadcast));
    let tally = tokio::spawn(async move {
        let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    let count = counts.entry(envelope.event.name()).or_insert(0);
                    *count = count.saturating_add(1);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event tally lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        counts
    });

    // 5. Ctrl-C raises the abort flag; the run stops before its next tick.
    let abort = circuit.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current period");
            abort.abort();
        }
    });

    // 6. Run until the horizon, an abort, or a fatal error.
    let (circuit, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = circuit.run(u64::MAX);
        (circuit, outcome)
    })
    .await
    .map_err(EngineError::from)?;
    let outcome = outcome.map_err(EngineError::from)?;

    // 7. Log results.
    match &outcome.cause {
        Some(cause) => warn!(
            status = %outcome.status,
            periods = outcome.periods_completed,
            last_period = %outcome.last_period,
            %cause,
            "Run ended early"
        ),
        None => info!(
            status = %outcome.status,
            periods = outcome.periods_completed,
            last_period = %outcome.last_period,
            "Run finished"
        ),
    }
    for metric in HEADLINE_METRICS {
        if let Some(point) = circuit.query_metric(metric, ..).last() {
            info!(metric, period = %point.period, value = %point.value, "Final value");
        }
    }

    // 8. Export.
    if let Ok(destination) = std::env::var(EXPORT_ENV) {
        export(&circuit, &destination)?;
        info!(path = %destination, metrics = circuit.list_metrics().len(), "Series exported");
    }

    drop(circuit);
    let counts = tally.await.map_err(EngineError::from)?;
    info!(events = ?counts, "macrosim-engine shutdown complete");
    Ok(())
}

/// The configuration file: `MACROSIM_CONFIG` or `macrosim-config.yaml`.
fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from)
}

/// Load the kernel and economy sections from one file, falling back to
/// defaults when the file does not exist.
fn load_config(path: &Path) -> Result<(SimulationConfig, EconomyConfig), EngineError> {
    if path.exists() {
        let config = SimulationConfig::from_file(path)?;
        let economy = EconomyConfig::from_file(path)?;
        Ok((config, economy))
    } else {
        Ok((SimulationConfig::default(), EconomyConfig::default()))
    }
}

/// Install the subscriber: `RUST_LOG` wins over `logging.level`.
fn init_tracing(config: &SimulationConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Write every recorded series and marker as pretty JSON.
fn export(circuit: &Circuit, destination: &str) -> Result<(), EngineError> {
    let table = circuit.export(..);
    let json = serde_json::to_string_pretty(&table)?;
    std::fs::write(destination, json).map_err(|source| EngineError::Export {
        path: destination.to_owned(),
        source,
    })
}
