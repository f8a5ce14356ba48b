//! Period clock for the macrosim kernel.
//!
//! The clock is the single owner of the current [`Period`]. It only moves
//! forward, one calendar month per step, and refuses to move past the
//! configured horizon.

use macrosim_types::{Period, YearMonth};

use crate::config::TimeConfig;

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The horizon has been reached; the clock stays on its last period.
    #[error("terminal period {period} reached (horizon of {horizon} periods)")]
    TerminalPeriod {
        /// The last period of the run.
        period: Period,
        /// The configured number of periods.
        horizon: u64,
    },

    /// Step counter would overflow.
    #[error("period counter overflow: cannot advance beyond u64::MAX")]
    Overflow,

    /// Invalid time configuration.
    #[error("invalid time configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

/// Simulated calendar clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clock {
    /// The current period.
    current: Period,
    /// Number of periods in the run, if bounded.
    horizon: Option<u64>,
}

impl Clock {
    /// Create a clock at step 0 of `origin`. A `horizon` of 0 means the
    /// run is unbounded.
    pub const fn new(origin: YearMonth, horizon: u64) -> Self {
        Self {
            current: Period::first(origin),
            horizon: if horizon == 0 { None } else { Some(horizon) },
        }
    }

    /// Create a clock from the time configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the start month is not in
    /// `1..=12`.
    pub fn from_config(config: &TimeConfig) -> Result<Self, ClockError> {
        let origin = YearMonth::new(config.start_year, config.start_month).ok_or_else(|| {
            ClockError::InvalidConfig {
                reason: format!("start_month must be 1-12, got {}", config.start_month),
            }
        })?;
        Ok(Self::new(origin, config.horizon_periods))
    }

    /// The current period.
    pub const fn current(&self) -> Period {
        self.current
    }

    /// The configured number of periods, or `None` if unbounded.
    pub const fn horizon(&self) -> Option<u64> {
        self.horizon
    }

    /// Whether the current period is the last one inside the horizon.
    pub fn is_last(&self) -> bool {
        self.horizon
            .is_some_and(|horizon| self.current.step().saturating_add(1) >= horizon)
    }

    /// Number of periods left after the current one, or `None` if unbounded.
    pub fn remaining(&self) -> Option<u64> {
        self.horizon.map(|horizon| {
            horizon
                .saturating_sub(self.current.step())
                .saturating_sub(1)
        })
    }

    /// Move to the next period and return it.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TerminalPeriod`] if the current period is the
    /// last inside the horizon, or [`ClockError::Overflow`] if the step
    /// counter is exhausted. The clock is unchanged in both cases.
    pub fn advance(&mut self) -> Result<Period, ClockError> {
        if let Some(horizon) = self.horizon {
            if self.is_last() {
                return Err(ClockError::TerminalPeriod {
                    period: self.current,
                    horizon,
                });
            }
        }
        self.current = self.current.next().ok_or(ClockError::Overflow)?;
        Ok(self.current)
    }
}
