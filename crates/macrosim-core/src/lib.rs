//! Period clock, market matching and orchestration for the macrosim kernel.
//!
//! This crate owns the tick cycle that drives a simulated economy:
//! Opening, Publication, Consumption, Settlement and Reporting.
//!
//! # Modules
//!
//! - [`clock`] -- Period clock with an optional horizon.
//! - [`config`] -- Configuration loading from `macrosim-config.yaml` into
//!   strongly-typed structs.
//! - [`market`] -- Per-period offer pools and the randomized
//!   [`MatchingEngine`].
//! - [`sector`] -- The [`Sector`] contract and the per-phase context.
//! - [`timeseries`] -- Append-only metric store queried by name.
//! - [`operator`] -- Thread-safe abort flag checked between ticks.
//! - [`circuit`] -- The [`Circuit`] state machine and tick loop.
//!
//! [`MatchingEngine`]: market::MatchingEngine
//! [`Sector`]: sector::Sector
//! [`Circuit`]: circuit::Circuit

pub mod circuit;
pub mod clock;
pub mod config;
pub mod market;
pub mod operator;
pub mod sector;
pub mod timeseries;

pub use circuit::{AbortCause, Circuit, CircuitError, RunOutcome};
pub use config::{ConfigError, SimulationConfig};
pub use market::{MarketError, MatchingEngine, Quote, Sale, Target};
pub use sector::{AgentFailure, InitContext, PhaseContext, Sector, SectorError};
pub use timeseries::{RepositoryError, SeriesSnapshot, TimeSeriesRepository};
