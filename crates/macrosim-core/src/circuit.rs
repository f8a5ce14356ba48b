//! The Circuit: the orchestrator that owns a run.
//!
//! A Circuit owns the clock, the ordered sector registry, the single seeded
//! random stream, the shared ledger and the time-series repository. It
//! moves through `Initializing -> Running -> Terminal | Aborted` and never
//! goes back; a new run needs a new Circuit.
//!
//! Each tick runs five global phases in order. Every sector finishes a
//! phase before any sector starts the next one, and within a phase sectors
//! are called in registration order:
//!
//! 1. **Opening** -- every sector updates its agents for the new period.
//! 2. **Publication** -- suppliers publish offers into a fresh market.
//! 3. **Consumption** -- consumers sample and consume offers.
//! 4. **Settlement** -- credit and default outcomes; agent failures are
//!    recorded as data, not errors.
//! 5. **Reporting** -- money conservation is checked; sector metrics and
//!    the failure, market and ledger aggregates are committed for the
//!    period in one batch; the balance-sheet matrix is snapshotted.
//!
//! The market is dropped when the tick returns, so no offer outlives its
//! period. Any other error halts the run in `Aborted` with the period,
//! sector and phase attached, and a period that fails leaves no metric
//! points, markers or failure events behind.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeBounds;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use macrosim_events::{CircuitEvent, EventBus, EventSink};
use macrosim_ledger::{BalanceLine, BalanceSheetMatrix, ConservationResult, FlowKind, Ledger};
use macrosim_types::{Period, Phase, RunId, RunStatus, SectorId};

use crate::clock::{Clock, ClockError};
use crate::config::{MarketConfig, SimulationConfig};
use crate::market::{Market, MarketError, Target};
use crate::operator::AbortHandle;
use crate::sector::{AgentFailure, InitContext, PhaseContext, Sector, SectorError, SectorSlot};
use crate::timeseries::{Marker, RepositoryError, SeriesSnapshot, SeriesTable, TimeSeriesRepository};

/// Total agent failures across sectors, per period.
pub const METRIC_AGENT_FAILURES: &str = "circuit.agent_failures";

/// Metric namespaces written by the Circuit itself; no sector may take
/// one of these names.
pub const RESERVED_NAMESPACES: [&str; 3] = ["circuit", "market", "ledger"];

/// Errors raised by the Circuit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    /// The operation is not allowed in the current lifecycle state.
    #[error("{operation} is not allowed while the circuit is {status}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the circuit was in.
        status: RunStatus,
    },

    /// A sector with the same name is already registered.
    #[error("sector name already registered: {name}")]
    DuplicateSector {
        /// The rejected name.
        name: String,
    },

    /// Sector names must be non-empty, free of `.`, and not one of
    /// [`RESERVED_NAMESPACES`].
    #[error("invalid sector name: {name:?}")]
    InvalidSectorName {
        /// The rejected name.
        name: String,
    },

    /// More sectors than a [`SectorId`] can address.
    #[error("too many sectors registered")]
    TooManySectors,

    /// A sector failed to initialize.
    #[error("sector {sector} failed to initialize: {source}")]
    Initialization {
        /// The sector at fault.
        sector: String,
        /// The sector's error.
        source: Box<SectorError>,
    },

    /// A sector phase handler failed.
    #[error("sector {sector} failed during {phase} of {period}: {source}")]
    Sector {
        /// The period of the failure.
        period: Period,
        /// The sector at fault.
        sector: String,
        /// The phase at fault.
        phase: Phase,
        /// The sector's error.
        source: Box<SectorError>,
    },

    /// A metric write collided.
    #[error("repository error: {source}")]
    Repository {
        /// The underlying repository error.
        #[from]
        source: RepositoryError,
    },

    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// Deposits and loans diverged.
    #[error("money conservation violated in {period}: deposits {deposits}, loans {loans}")]
    Conservation {
        /// The period in which the check failed.
        period: Period,
        /// Total deposits.
        deposits: Decimal,
        /// Total outstanding loans.
        loans: Decimal,
    },
}

/// Why a run ended in `Aborted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortCause {
    /// The abort flag was raised; the run stopped between ticks.
    Cancelled {
        /// The period that would have run next.
        period: Period,
    },
    /// A fatal error.
    Fault {
        /// The period in which the error occurred.
        period: Period,
        /// The sector at fault, if any.
        sector: Option<String>,
        /// The phase at fault, if any.
        phase: Option<Phase>,
        /// The error.
        error: CircuitError,
    },
}

impl AbortCause {
    /// The period the cause refers to.
    pub const fn period(&self) -> Period {
        match self {
            Self::Cancelled { period } | Self::Fault { period, .. } => *period,
        }
    }

    /// The sector at fault, if any.
    pub fn sector(&self) -> Option<&str> {
        match self {
            Self::Cancelled { .. } => None,
            Self::Fault { sector, .. } => sector.as_deref(),
        }
    }

    /// The phase at fault, if any.
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Cancelled { .. } => None,
            Self::Fault { phase, .. } => *phase,
        }
    }

    fn sector_fault(period: Period, sector: &str, phase: Phase, error: SectorError) -> Self {
        Self::Fault {
            period,
            sector: Some(sector.to_owned()),
            phase: Some(phase),
            error: CircuitError::Sector {
                period,
                sector: sector.to_owned(),
                phase,
                source: Box::new(error),
            },
        }
    }

    fn circuit_fault(period: Period, phase: Option<Phase>, error: CircuitError) -> Self {
        Self::Fault {
            period,
            sector: None,
            phase,
            error,
        }
    }
}

impl core::fmt::Display for AbortCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Cancelled { period } => write!(f, "cancelled before {period}"),
            Self::Fault { error, .. } => write!(f, "{error}"),
        }
    }
}

/// What [`Circuit::run`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// `Terminal` or `Aborted`.
    pub status: RunStatus,
    /// Ticks completed over the Circuit's life.
    pub periods_completed: u64,
    /// The current period when the run ended.
    pub last_period: Period,
    /// Set when `status` is `Aborted`.
    pub cause: Option<AbortCause>,
}

/// The top-level orchestrator of one simulation run.
pub struct Circuit {
    run_id: RunId,
    name: String,
    seed: u64,
    status: RunStatus,
    clock: Clock,
    market_config: MarketConfig,
    rng: StdRng,
    sectors: Vec<SectorSlot>,
    directory: Vec<String>,
    ledger: Ledger,
    repository: TimeSeriesRepository,
    matrices: BTreeMap<u64, BalanceSheetMatrix>,
    events: EventBus,
    abort: AbortHandle,
    periods_completed: u64,
    cause: Option<AbortCause>,
}

impl Circuit {
    /// Build a Circuit in `Initializing` from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitError::Clock`] if the time section is invalid.
    pub fn new(config: &SimulationConfig) -> Result<Self, CircuitError> {
        let clock = Clock::from_config(&config.time)?;
        let run_id = RunId::new();
        info!(
            %run_id,
            name = %config.world.name,
            seed = config.world.seed,
            origin = %clock.current(),
            horizon = ?clock.horizon(),
            "Circuit created"
        );
        Ok(Self {
            run_id,
            name: config.world.name.clone(),
            seed: config.world.seed,
            status: RunStatus::Initializing,
            clock,
            market_config: config.market,
            rng: StdRng::seed_from_u64(config.world.seed),
            sectors: Vec::new(),
            directory: Vec::new(),
            ledger: Ledger::new(),
            repository: TimeSeriesRepository::new(),
            matrices: BTreeMap::new(),
            events: EventBus::new(run_id),
            abort: AbortHandle::new(),
            periods_completed: 0,
            cause: None,
        })
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Add a sector at the end of the registration order.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitError::InvalidState`] outside `Initializing`, or
    /// an error if the name is empty, contains `.`, is reserved, or is
    /// taken.
    pub fn register_sector(&mut self, sector: Box<dyn Sector>) -> Result<SectorId, CircuitError> {
        if self.status != RunStatus::Initializing {
            return Err(CircuitError::InvalidState {
                operation: "register_sector",
                status: self.status,
            });
        }
        let name = sector.name();
        if name.is_empty() || name.contains('.') || RESERVED_NAMESPACES.contains(&name) {
            return Err(CircuitError::InvalidSectorName {
                name: name.to_owned(),
            });
        }
        if self.sectors.iter().any(|slot| slot.name() == name) {
            return Err(CircuitError::DuplicateSector {
                name: name.to_owned(),
            });
        }
        let Ok(index) = u32::try_from(self.sectors.len()) else {
            return Err(CircuitError::TooManySectors);
        };
        let id = SectorId(index);
        debug!(%id, name, capabilities = ?sector.capabilities(), "Sector registered");
        self.directory.push(name.to_owned());
        self.sectors.push(SectorSlot::new(id, sector));
        Ok(id)
    }

    /// Attach an event sink. Sinks receive every later event.
    pub fn subscribe(&mut self, sink: Box<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    /// A handle that stops the run before its next tick when raised.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Initialize every sector in registration order and enter `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitError::InvalidState`] outside `Initializing`, or
    /// the sector error that made initialization fail, in which case the
    /// Circuit is `Aborted`.
    pub fn start(&mut self) -> Result<(), CircuitError> {
        if self.status != RunStatus::Initializing {
            return Err(CircuitError::InvalidState {
                operation: "start",
                status: self.status,
            });
        }
        let period = self.clock.current();
        let mut failed = None;
        for slot in &mut self.sectors {
            let mut ctx = InitContext::new(period, slot.id(), &mut self.rng, &mut self.ledger);
            if let Err(err) = slot.sector_mut().initialize(&mut ctx) {
                failed = Some((slot.name().to_owned(), err));
                break;
            }
        }
        if let Some((sector, err)) = failed {
            let error = CircuitError::Initialization {
                sector: sector.clone(),
                source: Box::new(err),
            };
            self.abort_with(AbortCause::Fault {
                period,
                sector: Some(sector),
                phase: None,
                error: error.clone(),
            });
            return Err(error);
        }
        self.status = RunStatus::Running;
        let sectors = self.sector_names();
        info!(run_id = %self.run_id, %period, sectors = sectors.len(), "Circuit running");
        self.events.emit(CircuitEvent::RunStarted {
            period,
            sectors,
            seed: self.seed,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Run at most `max_periods` ticks, starting the Circuit first if it is
    /// still `Initializing`.
    ///
    /// The run ends `Terminal` after `max_periods` ticks or when the clock
    /// reaches its horizon, whichever comes first, and `Aborted` on a fatal
    /// error or a raised abort flag. The flag is checked before every tick.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitError::InvalidState`] if the run already ended.
    /// Failures during the run are reported in the outcome, not as errors.
    pub fn run(&mut self, max_periods: u64) -> Result<RunOutcome, CircuitError> {
        match self.status {
            RunStatus::Initializing => {
                if self.start().is_err() {
                    return Ok(self.outcome());
                }
            }
            RunStatus::Running => {}
            RunStatus::Terminal | RunStatus::Aborted => {
                return Err(CircuitError::InvalidState {
                    operation: "run",
                    status: self.status,
                });
            }
        }

        let mut ticks: u64 = 0;
        loop {
            if ticks >= max_periods {
                info!(max_periods, "Run limit reached");
                self.terminate();
                break;
            }
            if self.abort.is_aborted() {
                info!(period = %self.clock.current(), "Abort requested");
                self.abort_with(AbortCause::Cancelled {
                    period: self.clock.current(),
                });
                break;
            }

            if let Err(cause) = self.tick() {
                self.abort_with(cause);
                break;
            }
            ticks = ticks.saturating_add(1);
            self.periods_completed = self.periods_completed.saturating_add(1);

            if ticks >= max_periods {
                info!(max_periods, "Run limit reached");
                self.terminate();
                break;
            }
            match self.clock.advance() {
                Ok(period) => self.events.emit(CircuitEvent::PeriodAdvanced { period }),
                Err(ClockError::TerminalPeriod { period, horizon }) => {
                    info!(%period, horizon, "Horizon reached");
                    self.terminate();
                    break;
                }
                Err(err) => {
                    let period = self.clock.current();
                    self.abort_with(AbortCause::circuit_fault(period, None, err.into()));
                    break;
                }
            }
        }
        Ok(self.outcome())
    }

    /// Execute one tick for the current period.
    fn tick(&mut self) -> Result<(), AbortCause> {
        let period = self.clock.current();
        let mut market = Market::new(period, self.market_config);
        debug!(%period, "Tick started");

        // --- Phase 1: Opening ---
        self.phase_opening(period, &mut market)?;

        // --- Phase 2: Publication ---
        self.phase_publication(period, &mut market)?;

        // --- Phase 3: Consumption ---
        self.phase_consumption(period, &mut market)?;

        // --- Phase 4: Settlement ---
        let failures = self.phase_settlement(period, &mut market)?;

        // --- Phase 5: Reporting ---
        self.check_conservation(period)?;
        let recorded = self.phase_reporting(period, &market, &failures)?;
        self.snapshot_balance_sheet(period);

        debug!(%period, recorded, "Tick completed");
        self.events.emit(CircuitEvent::PeriodCompleted {
            period,
            metrics_recorded: recorded,
        });
        Ok(())
    }

    fn phase_opening(&mut self, period: Period, market: &mut Market) -> Result<(), AbortCause> {
        for slot in &mut self.sectors {
            let name = slot.name().to_owned();
            let mut ctx = PhaseContext::new(
                period,
                Phase::Opening,
                slot.id(),
                &name,
                &self.directory,
                &mut self.rng,
                &mut self.ledger,
                market,
            );
            slot.sector_mut()
                .open_period(&mut ctx)
                .map_err(|err| AbortCause::sector_fault(period, &name, Phase::Opening, err))?;
        }
        Ok(())
    }

    fn phase_publication(&mut self, period: Period, market: &mut Market) -> Result<(), AbortCause> {
        for slot in &mut self.sectors {
            if !slot.participates_in(Phase::Publication) {
                continue;
            }
            let name = slot.name().to_owned();
            let id = slot.id();
            let offers = {
                let mut ctx = PhaseContext::new(
                    period,
                    Phase::Publication,
                    id,
                    &name,
                    &self.directory,
                    &mut self.rng,
                    &mut self.ledger,
                    market,
                );
                slot.publish(&mut ctx)
            }
            .map_err(|err| AbortCause::sector_fault(period, &name, Phase::Publication, err))?;

            let count = market.publish(id, offers).map_err(|err| {
                let err = match err {
                    MarketError::ForeignSeller { .. } | MarketError::AlreadyPublished { .. } => {
                        SectorError::ProtocolViolation {
                            sector: name.clone(),
                            reason: err.to_string(),
                        }
                    }
                    other => SectorError::Market(other),
                };
                AbortCause::sector_fault(period, &name, Phase::Publication, err)
            })?;
            debug!(%period, sector = %name, live_offers = count, "Supply published");
        }
        Ok(())
    }

    fn phase_consumption(&mut self, period: Period, market: &mut Market) -> Result<(), AbortCause> {
        for slot in &mut self.sectors {
            if !slot.participates_in(Phase::Consumption) {
                continue;
            }
            let name = slot.name().to_owned();
            let mut ctx = PhaseContext::new(
                period,
                Phase::Consumption,
                slot.id(),
                &name,
                &self.directory,
                &mut self.rng,
                &mut self.ledger,
                market,
            );
            slot.sector_mut()
                .consume(&mut ctx)
                .map_err(|err| AbortCause::sector_fault(period, &name, Phase::Consumption, err))?;
        }
        debug!(
            %period,
            sales = market.sales().len(),
            live_offers = market.live_count(Target::Any),
            "Consumption completed"
        );
        Ok(())
    }

    fn phase_settlement(
        &mut self,
        period: Period,
        market: &mut Market,
    ) -> Result<Vec<(String, Vec<AgentFailure>)>, AbortCause> {
        let mut failures = Vec::new();
        for slot in &mut self.sectors {
            if !slot.participates_in(Phase::Settlement) {
                continue;
            }
            let name = slot.name().to_owned();
            let mut ctx = PhaseContext::new(
                period,
                Phase::Settlement,
                slot.id(),
                &name,
                &self.directory,
                &mut self.rng,
                &mut self.ledger,
                market,
            );
            let found = match slot.sector_mut().settle(&mut ctx) {
                Ok(found) => found,
                Err(SectorError::AgentFailure(failure)) => vec![failure],
                Err(err) => {
                    return Err(AbortCause::sector_fault(period, &name, Phase::Settlement, err));
                }
            };
            for failure in &found {
                warn!(%period, sector = %name, %failure, "Agent failure");
            }
            failures.push((name, found));
        }
        Ok(failures)
    }

    /// Stage every value of the period, then commit them in one batch, so
    /// a failed period leaves no points behind.
    fn phase_reporting(
        &mut self,
        period: Period,
        market: &Market,
        failures: &[(String, Vec<AgentFailure>)],
    ) -> Result<usize, AbortCause> {
        let mut staged: Vec<(String, Decimal)> = Vec::new();
        let mut owners: BTreeMap<String, String> = BTreeMap::new();
        for slot in &mut self.sectors {
            let name = slot.name().to_owned();
            let values = slot
                .report(&period)
                .map_err(|err| AbortCause::sector_fault(period, &name, Phase::Reporting, err))?;
            for (metric, value) in values {
                let key = format!("{name}.{metric}");
                owners.insert(key.clone(), name.clone());
                staged.push((key, value));
            }
        }
        staged.extend(failure_metrics(failures));
        staged.extend(market_metrics(market));
        staged.extend(self.ledger_metrics(period));

        let recorded = self.repository.record_batch(&period, staged).map_err(|err| {
            let sector = match &err {
                RepositoryError::DuplicateWrite { metric, .. } => owners.get(metric).cloned(),
                RepositoryError::EmptyMetricName => None,
            };
            AbortCause::Fault {
                period,
                sector,
                phase: Some(Phase::Reporting),
                error: err.into(),
            }
        })?;

        self.announce_failures(period, failures);
        Ok(recorded)
    }

    /// Emit an event per agent failure and a marker per sector and kind.
    fn announce_failures(&mut self, period: Period, failures: &[(String, Vec<AgentFailure>)]) {
        for (sector, found) in failures {
            let mut kinds = BTreeSet::new();
            for failure in found {
                kinds.insert(failure.kind);
                self.events.emit(CircuitEvent::AgentFailed {
                    period,
                    sector: sector.clone(),
                    agent: failure.agent,
                    kind: failure.kind,
                    reason: failure.reason.clone(),
                });
            }
            for kind in kinds {
                self.add_marker(period, format!("{sector} {}", kind.label()));
            }
        }
    }

    fn ledger_metrics(&self, period: Period) -> Vec<(String, Decimal)> {
        let totals = self.ledger.flow_totals(period.step());
        let mut metrics = vec![
            ("ledger.deposits".to_owned(), self.ledger.total_deposits()),
            ("ledger.loans".to_owned(), self.ledger.total_loans()),
        ];
        for kind in FlowKind::ALL {
            let amount = totals.get(&kind).copied().unwrap_or(Decimal::ZERO);
            metrics.push((format!("ledger.flows.{}", kind.as_str()), amount));
        }
        metrics
    }

    fn snapshot_balance_sheet(&mut self, period: Period) {
        let mut matrix = BalanceSheetMatrix::new();
        for slot in &self.sectors {
            let balance = self.ledger.sector_balance(slot.id());
            matrix.set(slot.name(), BalanceLine::Deposits, balance.deposits);
            matrix.set(slot.name(), BalanceLine::LoansOutstanding, balance.loans_outstanding);
            matrix.set(slot.name(), BalanceLine::LoansGranted, balance.loans_granted);
            slot.sector().balance_sheet(&self.ledger, &mut matrix);
        }
        self.matrices.insert(period.step(), matrix);
    }

    fn check_conservation(&self, period: Period) -> Result<(), AbortCause> {
        match self.ledger.verify_conservation() {
            ConservationResult::Balanced => Ok(()),
            ConservationResult::Anomaly { deposits, loans } => {
                error!(%period, %deposits, %loans, "Money conservation violated");
                Err(AbortCause::circuit_fault(
                    period,
                    None,
                    CircuitError::Conservation {
                        period,
                        deposits,
                        loans,
                    },
                ))
            }
        }
    }

    fn terminate(&mut self) {
        self.status = RunStatus::Terminal;
        let period = self.clock.current();
        info!(
            run_id = %self.run_id,
            %period,
            periods_completed = self.periods_completed,
            "Run terminated"
        );
        self.events.emit(CircuitEvent::RunTerminated {
            period,
            periods_completed: self.periods_completed,
        });
    }

    fn abort_with(&mut self, cause: AbortCause) {
        self.status = RunStatus::Aborted;
        match &cause {
            AbortCause::Cancelled { period } => {
                warn!(run_id = %self.run_id, %period, "Run cancelled");
            }
            AbortCause::Fault {
                period,
                sector,
                phase,
                error,
            } => {
                error!(run_id = %self.run_id, %period, ?sector, ?phase, %error, "Run aborted");
            }
        }
        self.events.emit(CircuitEvent::RunAborted {
            period: cause.period(),
            sector: cause.sector().map(str::to_owned),
            phase: cause.phase(),
            cause: cause.to_string(),
        });
        self.cause = Some(cause);
    }

    fn outcome(&self) -> RunOutcome {
        RunOutcome {
            status: self.status,
            periods_completed: self.periods_completed,
            last_period: self.clock.current(),
            cause: self.cause.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Identifier of this run.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The configured run name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seed of the random stream.
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Lifecycle state.
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// The current period.
    pub const fn current_period(&self) -> Period {
        self.clock.current()
    }

    /// Number of ticks completed.
    pub const fn periods_completed(&self) -> u64 {
        self.periods_completed
    }

    /// Why the run aborted, if it did.
    pub const fn abort_cause(&self) -> Option<&AbortCause> {
        self.cause.as_ref()
    }

    /// Sector names in registration order.
    pub fn sector_names(&self) -> Vec<String> {
        self.sectors.iter().map(|slot| slot.name().to_owned()).collect()
    }

    /// The id of the sector registered as `name`.
    pub fn sector_id(&self, name: &str) -> Option<SectorId> {
        self.sectors
            .iter()
            .find(|slot| slot.name() == name)
            .map(SectorSlot::id)
    }

    /// `(period, value)` pairs of `metric` for steps in `steps`.
    pub fn query_metric(&self, metric: &str, steps: impl RangeBounds<u64>) -> SeriesSnapshot {
        self.repository.query(metric, steps)
    }

    /// Every metric name recorded so far.
    pub fn list_metrics(&self) -> BTreeSet<String> {
        self.repository.list_metrics()
    }

    /// The metric store.
    pub const fn repository(&self) -> &TimeSeriesRepository {
        &self.repository
    }

    /// Every series over `steps` as a column table.
    pub fn export(&self, steps: impl RangeBounds<u64> + Clone) -> SeriesTable {
        self.repository.export(steps)
    }

    /// The balance-sheet matrix of period `step`, once that period has run.
    pub fn balance_sheet(&self, step: u64) -> Option<&BalanceSheetMatrix> {
        self.matrices.get(&step)
    }

    /// The shared ledger.
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Label `period` and notify subscribers.
    pub fn add_marker(&mut self, period: Period, label: impl Into<String>) {
        let label = label.into();
        debug!(%period, label, "Marker added");
        self.repository.add_marker(&period, label.clone());
        self.events.emit(CircuitEvent::MarkerAdded { period, label });
    }

    /// Markers whose step lies in `steps`.
    pub fn markers(&self, steps: impl RangeBounds<u64>) -> Vec<Marker> {
        self.repository.markers(steps)
    }
}

impl core::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Circuit")
            .field("run_id", &self.run_id)
            .field("status", &self.status)
            .field("period", &self.clock.current())
            .field("sectors", &self.sector_names())
            .finish_non_exhaustive()
    }
}

/// Failure counts per settling sector, plus the total.
fn failure_metrics(failures: &[(String, Vec<AgentFailure>)]) -> Vec<(String, Decimal)> {
    let mut metrics = Vec::new();
    let mut total: u64 = 0;
    for (sector, found) in failures {
        let count = u64::try_from(found.len()).unwrap_or(u64::MAX);
        total = total.saturating_add(count);
        metrics.push((format!("{sector}.agent_failures"), Decimal::from(count)));
    }
    metrics.push((METRIC_AGENT_FAILURES.to_owned(), Decimal::from(total)));
    metrics
}

/// Per-period market aggregates.
fn market_metrics(market: &Market) -> Vec<(String, Decimal)> {
    let supply = market.supply_summary(Target::Any);
    let sales = market.sales_summary();
    let mut metrics = vec![
        ("market.supply.offers".to_owned(), Decimal::from(supply.offers)),
        ("market.supply.volume".to_owned(), supply.volume),
        ("market.supply.value".to_owned(), supply.value),
        ("market.sales.volume".to_owned(), sales.volume),
        ("market.sales.value".to_owned(), sales.value),
        ("market.unsold.volume".to_owned(), supply.unsold),
    ];
    if let Some(price) = sales.average_price() {
        metrics.push(("market.sales.average_price".to_owned(), price));
    }
    metrics
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use rust_decimal_macros::dec;

    use macrosim_events::RecordingSink;
    use macrosim_types::{Capabilities, Capability};

    use super::*;

    struct Counter {
        name: &'static str,
        opened: u64,
    }

    impl Sector for Counter {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE
        }

        fn open_period(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
            self.opened = self.opened.saturating_add(1);
            Ok(())
        }

        fn report(&self, _period: &Period) -> BTreeMap<String, Decimal> {
            BTreeMap::from([("opened".to_owned(), Decimal::from(self.opened))])
        }
    }

    fn counter(name: &'static str) -> Box<dyn Sector> {
        Box::new(Counter { name, opened: 0 })
    }

    fn config(horizon: u64) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.time.horizon_periods = horizon;
        config
    }

    #[test]
    fn registration_only_while_initializing() {
        let mut circuit = Circuit::new(&config(0)).unwrap();
        assert_eq!(circuit.register_sector(counter("a")).unwrap(), SectorId(0));
        assert_eq!(circuit.register_sector(counter("b")).unwrap(), SectorId(1));
        assert!(matches!(
            circuit.register_sector(counter("a")),
            Err(CircuitError::DuplicateSector { .. })
        ));
        assert!(matches!(
            circuit.register_sector(counter("a.b")),
            Err(CircuitError::InvalidSectorName { .. })
        ));
        for reserved in RESERVED_NAMESPACES {
            assert!(matches!(
                circuit.register_sector(counter(reserved)),
                Err(CircuitError::InvalidSectorName { .. })
            ));
        }
        assert_eq!(circuit.sector_names(), vec!["a".to_owned(), "b".to_owned()]);
        circuit.start().unwrap();
        assert_eq!(circuit.status(), RunStatus::Running);
        assert!(matches!(
            circuit.register_sector(counter("c")),
            Err(CircuitError::InvalidState { .. })
        ));
        assert!(circuit.start().is_err());
    }

    #[test]
    fn horizon_ends_run_terminal() {
        let mut circuit = Circuit::new(&config(3)).unwrap();
        circuit.register_sector(counter("a")).unwrap();
        let outcome = circuit.run(100).unwrap();
        assert_eq!(outcome.status, RunStatus::Terminal);
        assert_eq!(outcome.periods_completed, 3);
        assert_eq!(outcome.last_period.step(), 2);
        assert!(outcome.cause.is_none());
        assert_eq!(circuit.query_metric("a.opened", ..).len(), 3);
        assert!(matches!(
            circuit.run(1),
            Err(CircuitError::InvalidState { .. })
        ));
    }

    #[test]
    fn raised_abort_flag_cancels_before_next_tick() {
        let mut circuit = Circuit::new(&config(0)).unwrap();
        circuit.register_sector(counter("a")).unwrap();
        circuit.abort_handle().abort();
        let outcome = circuit.run(10).unwrap();
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.periods_completed, 0);
        assert!(matches!(outcome.cause, Some(AbortCause::Cancelled { .. })));
    }

    #[test]
    fn zero_limit_terminates_without_ticking() {
        let mut circuit = Circuit::new(&config(0)).unwrap();
        circuit.register_sector(counter("a")).unwrap();
        let outcome = circuit.run(0).unwrap();
        assert_eq!(outcome.status, RunStatus::Terminal);
        assert_eq!(outcome.periods_completed, 0);
        assert!(circuit.list_metrics().is_empty());
    }

    #[test]
    fn circuit_metrics_and_balance_sheet_every_period() {
        let mut circuit = Circuit::new(&config(0)).unwrap();
        circuit.register_sector(counter("a")).unwrap();
        circuit.run(2).unwrap();

        for metric in [
            METRIC_AGENT_FAILURES,
            "market.supply.volume",
            "market.unsold.volume",
            "ledger.deposits",
            "ledger.flows.wages",
        ] {
            assert_eq!(circuit.query_metric(metric, ..).len(), 2, "{metric}");
        }
        // Nothing traded, so no average price.
        assert!(circuit.query_metric("market.sales.average_price", ..).is_empty());
        let matrix = circuit.balance_sheet(1).unwrap();
        assert_eq!(matrix.get("a", BalanceLine::Deposits), Some(dec!(0)));
        assert!(circuit.balance_sheet(2).is_none());
    }

    #[test]
    fn markers_reach_subscribers() {
        let recorder = RecordingSink::new();
        let mut circuit = Circuit::new(&config(0)).unwrap();
        circuit.subscribe(Box::new(recorder.clone()));
        circuit.register_sector(counter("a")).unwrap();
        circuit.run(1).unwrap();
        circuit.add_marker(circuit.current_period(), "Policy change");

        let markers = circuit.markers(..);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].label, "Policy change");
        let names: Vec<&str> = recorder.events().iter().map(|e| e.event.name()).collect();
        assert_eq!(
            names,
            vec!["run_started", "period_completed", "run_terminated", "marker_added"]
        );
    }

    #[test]
    fn capability_is_required_to_publish() {
        struct Quiet;
        impl Sector for Quiet {
            fn name(&self) -> &str {
                "quiet"
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities::NONE.with(Capability::ConsumesSupply)
            }
            fn publish_supply(
                &mut self,
                _ctx: &mut PhaseContext<'_>,
            ) -> Result<Vec<macrosim_types::Supply>, SectorError> {
                Err(SectorError::Internal {
                    reason: "must not be called".to_owned(),
                })
            }
            fn report(&self, _period: &Period) -> BTreeMap<String, Decimal> {
                BTreeMap::new()
            }
        }

        let mut circuit = Circuit::new(&config(0)).unwrap();
        circuit.register_sector(Box::new(Quiet)).unwrap();
        let outcome = circuit.run(2).unwrap();
        assert_eq!(outcome.status, RunStatus::Terminal);
    }
}
