//! The contract between the Circuit and the sectors it drives.
//!
//! A sector is one role in the economy (suppliers, consumers, lenders). It
//! owns its agent population outright; the Circuit only sees what the
//! sector returns from its phase handlers and what it writes to the shared
//! ledger and market through the [`PhaseContext`].
//!
//! The Circuit invokes the handlers in a fixed global order every period:
//!
//! 1. [`Sector::open_period`] (every sector)
//! 2. [`Sector::publish_supply`] (sectors declaring `PublishesSupply`)
//! 3. [`Sector::consume`] (sectors declaring `ConsumesSupply`)
//! 4. [`Sector::settle`] (sectors declaring `Settles`)
//! 5. [`Sector::report`] (every sector)

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rust_decimal::Decimal;

use macrosim_ledger::{BalanceSheetMatrix, Ledger, LedgerError};
use macrosim_types::{AgentRef, Capabilities, FailureKind, Period, Phase, SectorId, Supply, SupplyError};

use crate::market::{Market, MarketError, MatchingEngine};

/// An individual agent inside a sector failed.
///
/// Recovered by the owning sector; the Circuit records it as data and
/// carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} of agent {agent}: {reason}", .kind.label())]
pub struct AgentFailure {
    /// The failed agent.
    pub agent: AgentRef,
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub reason: String,
}

impl AgentFailure {
    /// Build a failure record.
    pub fn new(agent: AgentRef, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            agent,
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors a sector phase handler can return.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SectorError {
    /// The phase contract was broken (double publication, foreign
    /// seller, consumption outside the consumption phase).
    #[error("protocol violation by {sector}: {reason}")]
    ProtocolViolation {
        /// The offending sector.
        sector: String,
        /// What was violated.
        reason: String,
    },

    /// One agent failed. Non-fatal when returned from settlement.
    #[error("agent failure: {0}")]
    AgentFailure(#[from] AgentFailure),

    /// A market request failed.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// A ledger operation failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A supply record could not be built.
    #[error("supply error: {0}")]
    Supply(#[from] SupplyError),

    /// Sector-internal error.
    #[error("internal sector error: {reason}")]
    Internal {
        /// Description of the error.
        reason: String,
    },
}

/// A polymorphic unit of the economy.
///
/// Only `name`, `capabilities` and `report` are required; the other
/// handlers default to doing nothing, and the Circuit calls the
/// capability-gated ones only for sectors declaring that capability.
pub trait Sector: Send {
    /// Unique name; prefixes every metric the sector reports.
    fn name(&self) -> &str;

    /// The protocol phases the sector takes part in.
    fn capabilities(&self) -> Capabilities;

    /// Build the initial agent state (open accounts, seed inventories).
    ///
    /// Called once when the Circuit starts.
    fn initialize(&mut self, _ctx: &mut InitContext<'_>) -> Result<(), SectorError> {
        Ok(())
    }

    /// Update internal agent state for the new period. Must have no
    /// effects visible to other sectors.
    fn open_period(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
        Ok(())
    }

    /// Return this period's offers. Every seller must be an agent of
    /// this sector.
    fn publish_supply(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<Vec<Supply>, SectorError> {
        Ok(Vec::new())
    }

    /// Sample and consume offers through [`PhaseContext::trade`].
    fn consume(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
        Ok(())
    }

    /// Resolve credit and default outcomes. Returned failures, and an
    /// `Err(SectorError::AgentFailure)`, are recorded without aborting
    /// the run.
    fn settle(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<Vec<AgentFailure>, SectorError> {
        Ok(Vec::new())
    }

    /// Metric values for `period`. A pure read of sector state.
    ///
    /// `agent_failures` is reserved: the Circuit records it for every
    /// settling sector.
    fn report(&self, period: &Period) -> BTreeMap<String, Decimal>;

    /// Add the sector's own lines (inventories, net worth) to the
    /// period's balance-sheet matrix. Deposits and loans are filled in by
    /// the Circuit from the ledger.
    fn balance_sheet(&self, _ledger: &Ledger, _matrix: &mut BalanceSheetMatrix) {}
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// What a sector may touch while it initializes.
pub struct InitContext<'a> {
    period: Period,
    sector: SectorId,
    rng: &'a mut StdRng,
    ledger: &'a mut Ledger,
}

impl<'a> InitContext<'a> {
    pub(crate) const fn new(
        period: Period,
        sector: SectorId,
        rng: &'a mut StdRng,
        ledger: &'a mut Ledger,
    ) -> Self {
        Self {
            period,
            sector,
            rng,
            ledger,
        }
    }

    /// The first period of the run.
    pub const fn period(&self) -> Period {
        self.period
    }

    /// The sector's registration id.
    pub const fn sector(&self) -> SectorId {
        self.sector
    }

    /// Reference to agent `local` of this sector.
    pub const fn agent(&self, local: u32) -> AgentRef {
        AgentRef::new(self.sector, local)
    }

    /// The shared random stream.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    /// The shared ledger.
    pub fn ledger(&mut self) -> &mut Ledger {
        &mut *self.ledger
    }
}

/// What a sector may touch during one phase call.
pub struct PhaseContext<'a> {
    period: Period,
    phase: Phase,
    sector: SectorId,
    name: &'a str,
    directory: &'a [String],
    rng: &'a mut StdRng,
    ledger: &'a mut Ledger,
    market: &'a mut Market,
}

impl<'a> PhaseContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) const fn new(
        period: Period,
        phase: Phase,
        sector: SectorId,
        name: &'a str,
        directory: &'a [String],
        rng: &'a mut StdRng,
        ledger: &'a mut Ledger,
        market: &'a mut Market,
    ) -> Self {
        Self {
            period,
            phase,
            sector,
            name,
            directory,
            rng,
            ledger,
            market,
        }
    }

    /// The current period.
    pub const fn period(&self) -> Period {
        self.period
    }

    /// The phase being executed.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// The calling sector's registration id.
    pub const fn sector(&self) -> SectorId {
        self.sector
    }

    /// Reference to agent `local` of the calling sector.
    pub const fn agent(&self, local: u32) -> AgentRef {
        AgentRef::new(self.sector, local)
    }

    /// Registration id of the sector called `name`, if any.
    pub fn sector_id(&self, name: &str) -> Option<SectorId> {
        let index = self.directory.iter().position(|n| n == name)?;
        u32::try_from(index).ok().map(SectorId)
    }

    /// The shared random stream.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    /// Read access to the shared ledger.
    pub fn ledger(&self) -> &Ledger {
        &*self.ledger
    }

    /// Write access to the shared ledger.
    ///
    /// # Errors
    ///
    /// Returns [`SectorError::ProtocolViolation`] outside the consumption
    /// and settlement phases, so opening and publication cannot move
    /// money.
    pub fn ledger_mut(&mut self) -> Result<&mut Ledger, SectorError> {
        if !matches!(self.phase, Phase::Consumption | Phase::Settlement) {
            return Err(self.out_of_phase("ledger writes"));
        }
        Ok(&mut *self.ledger)
    }

    /// Read access to this period's market.
    pub fn market(&self) -> &Market {
        &*self.market
    }

    /// The matching engine and the ledger, for paying for what is drawn.
    ///
    /// # Errors
    ///
    /// Returns [`SectorError::ProtocolViolation`] outside the consumption
    /// phase, so no offer is consumed before every sector has published.
    pub fn trade(&mut self) -> Result<(MatchingEngine<'_>, &mut Ledger), SectorError> {
        if self.phase != Phase::Consumption {
            return Err(self.out_of_phase("market access"));
        }
        Ok((
            MatchingEngine::new(&mut *self.market, &mut *self.rng),
            &mut *self.ledger,
        ))
    }

    fn out_of_phase(&self, what: &str) -> SectorError {
        SectorError::ProtocolViolation {
            sector: self.name.to_owned(),
            reason: format!("{what} during {} phase", self.phase),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry slot
// ---------------------------------------------------------------------------

/// A registered sector plus the per-period call guards.
pub(crate) struct SectorSlot {
    id: SectorId,
    name: String,
    capabilities: Capabilities,
    sector: Box<dyn Sector>,
    published: Option<u64>,
    reported: Option<u64>,
}

impl SectorSlot {
    pub(crate) fn new(id: SectorId, sector: Box<dyn Sector>) -> Self {
        Self {
            id,
            name: sector.name().to_owned(),
            capabilities: sector.capabilities(),
            sector,
            published: None,
            reported: None,
        }
    }

    pub(crate) const fn id(&self) -> SectorId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn participates_in(&self, phase: Phase) -> bool {
        self.capabilities.participates_in(phase)
    }

    pub(crate) fn sector(&self) -> &dyn Sector {
        self.sector.as_ref()
    }

    pub(crate) fn sector_mut(&mut self) -> &mut dyn Sector {
        self.sector.as_mut()
    }

    /// Call `publish_supply`, at most once per period.
    pub(crate) fn publish(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Vec<Supply>, SectorError> {
        let step = ctx.period().step();
        if self.published == Some(step) {
            return Err(self.violation(format!("second publication in period {}", ctx.period())));
        }
        self.published = Some(step);
        self.sector.publish_supply(ctx)
    }

    /// Call `report`, at most once per period.
    pub(crate) fn report(&mut self, period: &Period) -> Result<BTreeMap<String, Decimal>, SectorError> {
        let step = period.step();
        if self.reported == Some(step) {
            return Err(self.violation(format!("second report in period {period}")));
        }
        self.reported = Some(step);
        Ok(self.sector.report(period))
    }

    fn violation(&self, reason: String) -> SectorError {
        SectorError::ProtocolViolation {
            sector: self.name.clone(),
            reason,
        }
    }
}
