//! Shared type definitions for the macrosim simulation kernel.
//!
//! This crate is the single source of truth for the plain data types that
//! flow between the ledger, the event layer, the core engine and the
//! concrete sectors. Nothing here performs I/O or holds simulation state.
//!
//! # Modules
//!
//! - [`ids`] -- Identifiers for sectors, agents, offers and runs
//! - [`period`] -- The simulated calendar month ([`Period`], [`YearMonth`])
//! - [`supply`] -- The immutable [`Supply`] offer record
//! - [`enums`] -- Phases, capabilities, run status and failure kinds

pub mod enums;
pub mod ids;
pub mod period;
pub mod supply;

// Re-export all public types at crate root for convenience.
pub use enums::{Capabilities, Capability, FailureKind, Phase, RunStatus};
pub use ids::{AgentRef, OfferId, RunId, SectorId};
pub use period::{Period, YearMonth};
pub use supply::{Supply, SupplyError};
