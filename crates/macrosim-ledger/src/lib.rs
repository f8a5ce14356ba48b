//! Bank-account ledger and balance-sheet bookkeeping for the macrosim kernel.
//!
//! Every unit of money in the simulated economy lives in an account held by
//! one agent. Money is created only when a lender grants a loan and
//! destroyed only when a loan is repaid or written off, so the stock of
//! deposits always equals the stock of outstanding loans.
//!
//! # Architecture
//!
//! - [`ledger`] -- The [`Ledger`] struct: accounts, loans and the flow journal.
//! - [`conservation`] -- Verification of the deposits == loans identity.
//! - [`matrix`] -- The [`BalanceSheetMatrix`] snapshot consumed by displays.
//!
//! # Usage
//!
//! ```
//! use macrosim_ledger::{Ledger, FlowKind};
//! use macrosim_ledger::conservation::ConservationResult;
//! use macrosim_types::{AgentRef, SectorId};
//! use rust_decimal::Decimal;
//!
//! let bank = AgentRef::new(SectorId(2), 0);
//! let firm = AgentRef::new(SectorId(0), 0);
//! let worker = AgentRef::new(SectorId(1), 0);
//!
//! let mut ledger = Ledger::new();
//! ledger.open_lender(bank).ok();
//! ledger.open_account(firm).ok();
//! ledger.open_account(worker).ok();
//!
//! ledger.lend(0, bank, firm, Decimal::new(100, 0)).ok();
//! ledger.transfer(0, FlowKind::Wage, firm, worker, Decimal::new(60, 0)).ok();
//!
//! assert_eq!(ledger.verify_conservation(), ConservationResult::Balanced);
//! ```

pub mod conservation;
pub mod ledger;
pub mod matrix;

// Re-export primary types at crate root.
pub use conservation::ConservationResult;
pub use ledger::{Ledger, SectorBalance};
pub use matrix::{BalanceLine, BalanceSheetMatrix};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use macrosim_types::AgentRef;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when operating on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Amount must be strictly positive.
    #[error("ledger amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The rejected amount.
        amount: Decimal,
    },

    /// The account does not exist.
    #[error("unknown account: {holder}")]
    UnknownAccount {
        /// The missing account holder.
        holder: AgentRef,
    },

    /// An account already exists for this holder.
    #[error("account already open: {holder}")]
    DuplicateAccount {
        /// The holder whose account exists.
        holder: AgentRef,
    },

    /// The holder is not registered as a lender.
    #[error("{holder} is not a lender")]
    NotALender {
        /// The holder that attempted to lend.
        holder: AgentRef,
    },

    /// The paying account lacks the funds.
    #[error("insufficient funds in {holder}: wanted {requested}, available {available}")]
    InsufficientFunds {
        /// The paying account.
        holder: AgentRef,
        /// The amount requested.
        requested: Decimal,
        /// The current balance.
        available: Decimal,
    },

    /// A repayment larger than the outstanding loan.
    #[error("repayment of {requested} exceeds debt of {outstanding} owed by {borrower} to {lender}")]
    RepaymentExceedsDebt {
        /// The lender.
        lender: AgentRef,
        /// The borrower.
        borrower: AgentRef,
        /// The requested repayment.
        requested: Decimal,
        /// The outstanding principal.
        outstanding: Decimal,
    },

    /// The flow kind cannot be recorded through a plain transfer.
    #[error("flow kind {kind:?} cannot be recorded as a transfer")]
    InvalidFlowKind {
        /// The rejected kind.
        kind: FlowKind,
    },

    /// An internal error that should not occur in normal operation.
    #[error("internal ledger error: {0}")]
    Internal(&'static str),

    /// Decimal arithmetic overflowed.
    #[error("ledger arithmetic overflow: {context}")]
    Overflow {
        /// What was being computed.
        context: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Flow journal
// ---------------------------------------------------------------------------

/// Category of a money flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    /// Wage paid by an employer to a worker.
    Wage,
    /// Payment for goods bought on the market.
    Sale,
    /// Interest paid by a borrower to its lender.
    Interest,
    /// Any other deposit-to-deposit payment.
    Transfer,
    /// A new loan: money creation.
    LoanIssued,
    /// Principal repaid: money destruction.
    LoanRepaid,
    /// A loan cancelled by its lender: money destruction.
    WriteOff,
    /// Depositors covering a failed lender's shortfall.
    BailIn,
}

impl FlowKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Wage,
        Self::Sale,
        Self::Interest,
        Self::Transfer,
        Self::LoanIssued,
        Self::LoanRepaid,
        Self::WriteOff,
        Self::BailIn,
    ];

    /// Whether the kind can be recorded through [`Ledger::transfer`].
    pub const fn is_payment(self) -> bool {
        matches!(
            self,
            Self::Wage | Self::Sale | Self::Interest | Self::Transfer
        )
    }

    /// Lowercase name used in metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wage => "wages",
            Self::Sale => "sales",
            Self::Interest => "interest",
            Self::Transfer => "transfers",
            Self::LoanIssued => "loans_issued",
            Self::LoanRepaid => "loans_repaid",
            Self::WriteOff => "write_offs",
            Self::BailIn => "bail_ins",
        }
    }
}

/// One journal entry: `amount` moved from `from` to `to` in a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Step index of the period the flow belongs to.
    pub period: u64,
    /// Category of the flow.
    pub kind: FlowKind,
    /// Paying side (the lender for loan issuance and write-offs).
    pub from: AgentRef,
    /// Receiving side (the lender for repayments and bail-ins).
    pub to: AgentRef,
    /// Strictly positive amount.
    pub amount: Decimal,
}
