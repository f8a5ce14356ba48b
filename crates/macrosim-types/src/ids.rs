//! Identifiers used across the simulation.
//!
//! Sector and agent identifiers are plain indices: a sector is identified by
//! its registration order, and an agent by its sector plus a sector-local
//! index. Both are lookup keys, never ownership links. The only UUID-backed
//! identifier is [`RunId`], which tags a single Circuit for correlation in
//! logs and events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a registered sector: its zero-based registration index.
///
/// Registration order is part of the scheduling contract, so the index is
/// also the order in which the sector is invoked within every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorId(pub u32);

impl SectorId {
    /// Return the registration index as a `usize` for slice lookups.
    pub fn index(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl core::fmt::Display for SectorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "sector#{}", self.0)
    }
}

/// Reference to one internal agent (firm, household, bank) of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentRef {
    /// The sector owning the agent.
    pub sector: SectorId,
    /// Sector-local index of the agent.
    pub local: u32,
}

impl AgentRef {
    /// Create a reference to agent `local` of `sector`.
    pub const fn new(sector: SectorId, local: u32) -> Self {
        Self { sector, local }
    }
}

impl core::fmt::Display for AgentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.sector.0, self.local)
    }
}

/// Identifier of a published offer within the current period.
///
/// `index` is the insertion position inside the publishing sector's offer
/// pool, so ordering offer ids reproduces publication order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfferId {
    /// The publishing sector.
    pub sector: SectorId,
    /// Insertion position inside that sector's pool.
    pub index: u32,
}

impl core::fmt::Display for OfferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "offer {}/{}", self.sector.0, self.index)
    }
}

/// Unique identifier of one simulation run (one Circuit instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_ids_order_by_sector_then_insertion() {
        let a = OfferId { sector: SectorId(0), index: 5 };
        let b = OfferId { sector: SectorId(1), index: 0 };
        let c = OfferId { sector: SectorId(1), index: 2 };
        let mut ids = vec![c, a, b];
        ids.sort();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn agent_ref_display() {
        let agent = AgentRef::new(SectorId(2), 14);
        assert_eq!(agent.to_string(), "2:14");
        assert_eq!(SectorId(2).to_string(), "sector#2");
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
