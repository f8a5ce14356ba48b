//! Event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use macrosim_types::{AgentRef, FailureKind, Period, Phase, RunId, RunStatus};

/// Something that happened to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CircuitEvent {
    /// The Circuit left `Initializing`.
    RunStarted {
        /// The first period.
        period: Period,
        /// Registered sector names in registration order.
        sectors: Vec<String>,
        /// Seed of the random stream.
        seed: u64,
    },
    /// A tick completed and its metrics were recorded.
    PeriodCompleted {
        /// The period that just ran.
        period: Period,
        /// Number of metric values written for it.
        metrics_recorded: usize,
    },
    /// The clock moved to a new period.
    PeriodAdvanced {
        /// The period now current.
        period: Period,
    },
    /// An agent inside a sector failed during settlement.
    AgentFailed {
        /// The period of the failure.
        period: Period,
        /// Name of the owning sector.
        sector: String,
        /// The failed agent.
        agent: AgentRef,
        /// Failure category.
        kind: FailureKind,
        /// Human-readable detail.
        reason: String,
    },
    /// A period marker was placed.
    MarkerAdded {
        /// The marked period.
        period: Period,
        /// Marker label.
        label: String,
    },
    /// The run ended normally.
    RunTerminated {
        /// The last completed period.
        period: Period,
        /// Number of ticks executed.
        periods_completed: u64,
    },
    /// The run halted on a fatal error or cancellation.
    RunAborted {
        /// The period in which the run stopped.
        period: Period,
        /// The sector at fault, if any.
        sector: Option<String>,
        /// The phase at fault, if any.
        phase: Option<Phase>,
        /// Description of the cause.
        cause: String,
    },
}

impl CircuitEvent {
    /// The period the event refers to.
    pub const fn period(&self) -> Period {
        match self {
            Self::RunStarted { period, .. }
            | Self::PeriodCompleted { period, .. }
            | Self::PeriodAdvanced { period }
            | Self::AgentFailed { period, .. }
            | Self::MarkerAdded { period, .. }
            | Self::RunTerminated { period, .. }
            | Self::RunAborted { period, .. } => *period,
        }
    }

    /// The run status this event leaves the Circuit in, if it changes it.
    pub const fn status_change(&self) -> Option<RunStatus> {
        match self {
            Self::RunStarted { .. } => Some(RunStatus::Running),
            Self::RunTerminated { .. } => Some(RunStatus::Terminal),
            Self::RunAborted { .. } => Some(RunStatus::Aborted),
            _ => None,
        }
    }

    /// Short name used as the tracing message field.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::PeriodCompleted { .. } => "period_completed",
            Self::PeriodAdvanced { .. } => "period_advanced",
            Self::AgentFailed { .. } => "agent_failed",
            Self::MarkerAdded { .. } => "marker_added",
            Self::RunTerminated { .. } => "run_terminated",
            Self::RunAborted { .. } => "run_aborted",
        }
    }
}

/// An event stamped with its run and emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The emitting run.
    pub run: RunId,
    /// Sequence number within the run, starting at 0.
    pub sequence: u64,
    /// Wall-clock time of emission.
    pub emitted_at: DateTime<Utc>,
    /// The event itself.
    pub event: CircuitEvent,
}
