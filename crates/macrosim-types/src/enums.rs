//! Enumeration types shared by the engine, the sectors and the event layer.

use serde::{Deserialize, Serialize};

/// The ordered phases of one period.
///
/// Phase boundaries are global: every sector finishes phase *k* before any
/// sector starts phase *k+1*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Sectors update internal agent state for the new period.
    Opening,
    /// Supplier sectors publish their offers.
    Publication,
    /// Consumer sectors sample offers and settle trades.
    Consumption,
    /// Credit and default outcomes are resolved.
    Settlement,
    /// Sectors report their period metrics.
    Reporting,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 5] = [
        Self::Opening,
        Self::Publication,
        Self::Consumption,
        Self::Settlement,
        Self::Reporting,
    ];

    /// The capability a sector must declare to take part in this phase, or
    /// `None` if every sector takes part.
    pub const fn required_capability(self) -> Option<Capability> {
        match self {
            Self::Publication => Some(Capability::PublishesSupply),
            Self::Consumption => Some(Capability::ConsumesSupply),
            Self::Settlement => Some(Capability::Settles),
            Self::Opening | Self::Reporting => None,
        }
    }

    /// Lowercase phase name used in logs and metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Publication => "publication",
            Self::Consumption => "consumption",
            Self::Settlement => "settlement",
            Self::Reporting => "reporting",
        }
    }
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol role a sector can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// The sector publishes supplies during the publication phase.
    PublishesSupply,
    /// The sector samples and consumes supplies during the consumption phase.
    ConsumesSupply,
    /// The sector resolves credit outcomes during the settlement phase.
    Settles,
}

/// The set of capabilities a sector declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    publishes_supply: bool,
    consumes_supply: bool,
    settles: bool,
}

impl Capabilities {
    /// No optional capability: the sector only opens and reports.
    pub const NONE: Self = Self {
        publishes_supply: false,
        consumes_supply: false,
        settles: false,
    };

    /// Return a copy of this set with `capability` added.
    #[must_use]
    pub const fn with(mut self, capability: Capability) -> Self {
        match capability {
            Capability::PublishesSupply => self.publishes_supply = true,
            Capability::ConsumesSupply => self.consumes_supply = true,
            Capability::Settles => self.settles = true,
        }
        self
    }

    /// Whether `capability` is declared.
    pub const fn contains(self, capability: Capability) -> bool {
        match capability {
            Capability::PublishesSupply => self.publishes_supply,
            Capability::ConsumesSupply => self.consumes_supply,
            Capability::Settles => self.settles,
        }
    }

    /// Whether the sector takes part in `phase`.
    pub const fn participates_in(self, phase: Phase) -> bool {
        match phase.required_capability() {
            Some(capability) => self.contains(capability),
            None => true,
        }
    }
}

/// Lifecycle state of a Circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Sectors are being registered; no period has run.
    Initializing,
    /// Periods are being executed.
    Running,
    /// The run ended normally at its horizon.
    Terminal,
    /// The run was halted by a fatal error or an abort request.
    Aborted,
}

impl RunStatus {
    /// Whether the run has ended (terminal or aborted).
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Terminal | Self::Aborted)
    }
}

impl core::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Terminal => "terminal",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Category of an individual agent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A lender's equity turned negative.
    Insolvency,
    /// A borrower could not service its debt.
    Bankruptcy,
    /// Any other sector-specific failure.
    Other,
}

impl FailureKind {
    /// Human-readable label, used for period markers.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Insolvency => "insolvency",
            Self::Bankruptcy => "bankruptcy",
            Self::Other => "failure",
        }
    }
}
