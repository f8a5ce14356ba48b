//! Money conservation check.
//!
//! Money enters the simulated economy only as new loans and leaves only as
//! repaid or written-off loans. Payments move deposits between accounts and
//! bail-ins move them to a lender, so for every state of the ledger:
//!
//! ```text
//! sum(account balances) == sum(outstanding loans)
//! ```
//!
//! Every ledger operation keeps this identity by construction. The check
//! guards against a future operation that forgets one side.

use rust_decimal::Decimal;

/// The result of a conservation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConservationResult {
    /// Deposits equal loans.
    Balanced,
    /// The identity does not hold.
    Anomaly {
        /// Total account balances.
        deposits: Decimal,
        /// Total outstanding loans.
        loans: Decimal,
    },
}

impl ConservationResult {
    /// Whether the identity holds.
    pub const fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced)
    }
}

impl core::fmt::Display for ConservationResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Balanced => f.write_str("balanced"),
            Self::Anomaly { deposits, loans } => {
                write!(f, "deposits {deposits} != loans {loans}")
            }
        }
    }
}

/// Compare the two stocks.
pub fn verify_conservation(deposits: Decimal, loans: Decimal) -> ConservationResult {
    if deposits == loans {
        ConservationResult::Balanced
    } else {
        ConservationResult::Anomaly { deposits, loans }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_stocks_balance() {
        let r = verify_conservation(Decimal::new(5, 0), Decimal::new(500, 2));
        assert!(r.is_balanced());
    }

    #[test]
    fn unequal_stocks_report_anomaly() {
        let r = verify_conservation(Decimal::new(5, 0), Decimal::new(4, 0));
        assert_eq!(
            r,
            ConservationResult::Anomaly {
                deposits: Decimal::new(5, 0),
                loans: Decimal::new(4, 0),
            }
        );
        assert_eq!(r.to_string(), "deposits 5 != loans 4");
    }
}
