//! The ledger: accounts, loans and an append-only journal of money flows.
//!
//! # Design
//!
//! - **Accounts** are keyed by [`AgentRef`]. Ordinary holders can never go
//!   below zero. Lenders may run a negative balance, which is how a loss
//!   from a write-off shows up as negative equity.
//! - **Loans** are keyed by `(lender, borrower)`. Granting a loan credits the
//!   borrower's account; repaying or writing it off removes the same amount,
//!   so total deposits always equal total loans.
//! - **Journal** entries are appended for every movement and never modified.
//! - **Precision**: all amounts use [`Decimal`].

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use tracing::debug;

use macrosim_types::{AgentRef, SectorId};

use crate::conservation::{self, ConservationResult};
use crate::{Flow, FlowKind, LedgerError};

/// Decimal places kept when splitting a bail-in across depositors.
const BAIL_IN_SCALE: u32 = 8;

/// Aggregate money position of one sector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorBalance {
    /// Sum of the sector's account balances.
    pub deposits: Decimal,
    /// Principal owed by the sector's agents.
    pub loans_outstanding: Decimal,
    /// Principal owed to the sector's agents.
    pub loans_granted: Decimal,
}

/// The money ledger shared by all sectors of a run.
///
/// The Circuit owns the ledger and lends it to sectors during phase calls.
/// Accounts hold deposits at the banking system, so a payment from a
/// household to a firm never touches either sector's private state.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    /// Balance per account holder.
    accounts: BTreeMap<AgentRef, Decimal>,
    /// Holders allowed to grant loans.
    lenders: BTreeSet<AgentRef>,
    /// Outstanding principal per (lender, borrower).
    loans: BTreeMap<(AgentRef, AgentRef), Decimal>,
    /// All flows, in insertion order.
    journal: Vec<Flow>,
}

impl Ledger {
    /// Create a new empty ledger.
    pub const fn new() -> Self {
        Self {
            accounts: BTreeMap::new(),
            lenders: BTreeSet::new(),
            loans: BTreeMap::new(),
            journal: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    /// Open a zero-balance account for `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateAccount`] if the account exists.
    pub fn open_account(&mut self, holder: AgentRef) -> Result<(), LedgerError> {
        if self.accounts.contains_key(&holder) {
            return Err(LedgerError::DuplicateAccount { holder });
        }
        self.accounts.insert(holder, Decimal::ZERO);
        Ok(())
    }

    /// Open an account for `holder` and register it as a lender.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateAccount`] if the account exists.
    pub fn open_lender(&mut self, holder: AgentRef) -> Result<(), LedgerError> {
        self.open_account(holder)?;
        self.lenders.insert(holder);
        Ok(())
    }

    /// Whether `holder` has an account.
    pub fn has_account(&self, holder: AgentRef) -> bool {
        self.accounts.contains_key(&holder)
    }

    /// Whether `holder` is a registered lender.
    pub fn is_lender(&self, holder: AgentRef) -> bool {
        self.lenders.contains(&holder)
    }

    /// Registered lenders in ascending order.
    pub fn lenders(&self) -> impl Iterator<Item = AgentRef> + '_ {
        self.lenders.iter().copied()
    }

    /// Current balance of `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownAccount`] if no account exists.
    pub fn balance(&self, holder: AgentRef) -> Result<Decimal, LedgerError> {
        self.accounts
            .get(&holder)
            .copied()
            .ok_or(LedgerError::UnknownAccount { holder })
    }

    /// Current balance of `holder`, or zero if it has no account.
    pub fn balance_or_zero(&self, holder: AgentRef) -> Decimal {
        self.accounts.get(&holder).copied().unwrap_or(Decimal::ZERO)
    }

    // -----------------------------------------------------------------------
    // Payments
    // -----------------------------------------------------------------------

    /// Move `amount` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the kind is not a payment, the amount is
    /// not positive, either account is unknown, or `from` lacks the funds.
    pub fn transfer(
        &mut self,
        period: u64,
        kind: FlowKind,
        from: AgentRef,
        to: AgentRef,
        amount: Decimal,
    ) -> Result<&Flow, LedgerError> {
        if !kind.is_payment() {
            return Err(LedgerError::InvalidFlowKind { kind });
        }
        require_positive(amount)?;
        self.ensure_account(to)?;
        self.debit_funded(from, amount)?;
        self.credit(to, amount)?;
        self.append(period, kind, from, to, amount)
    }

    // -----------------------------------------------------------------------
    // Credit
    // -----------------------------------------------------------------------

    /// Grant a loan of `amount` from `lender` to `borrower`.
    ///
    /// The borrower's account is credited with newly created money.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if `lender` is not a lender, the borrower has
    /// no account, or the amount is not positive.
    pub fn lend(
        &mut self,
        period: u64,
        lender: AgentRef,
        borrower: AgentRef,
        amount: Decimal,
    ) -> Result<&Flow, LedgerError> {
        require_positive(amount)?;
        if !self.lenders.contains(&lender) {
            return Err(LedgerError::NotALender { holder: lender });
        }
        self.ensure_account(borrower)?;

        let principal = self.loans.entry((lender, borrower)).or_insert(Decimal::ZERO);
        *principal = principal
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { context: "loan principal" })?;
        self.credit(borrower, amount)?;

        self.append(period, FlowKind::LoanIssued, lender, borrower, amount)
    }

    /// Repay `amount` of the principal `borrower` owes `lender`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the amount is not positive, exceeds the
    /// outstanding principal, or exceeds the borrower's balance.
    pub fn repay(
        &mut self,
        period: u64,
        lender: AgentRef,
        borrower: AgentRef,
        amount: Decimal,
    ) -> Result<&Flow, LedgerError> {
        require_positive(amount)?;
        let outstanding = self.debt(lender, borrower);
        if amount > outstanding {
            return Err(LedgerError::RepaymentExceedsDebt {
                lender,
                borrower,
                requested: amount,
                outstanding,
            });
        }
        self.debit_funded(borrower, amount)?;
        self.reduce_principal(lender, borrower, amount);

        self.append(period, FlowKind::LoanRepaid, borrower, lender, amount)
    }

    /// Cancel the whole loan `borrower` owes `lender`.
    ///
    /// The lender absorbs the loss on its own account, which may become
    /// negative. Returns the amount written off (zero if no loan existed).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UnknownAccount`] if the lender has no account.
    pub fn write_off(
        &mut self,
        period: u64,
        lender: AgentRef,
        borrower: AgentRef,
    ) -> Result<Decimal, LedgerError> {
        let Some(amount) = self.loans.remove(&(lender, borrower)) else {
            return Ok(Decimal::ZERO);
        };
        let balance = self.balance(lender)?;
        let after = balance
            .checked_sub(amount)
            .ok_or(LedgerError::Overflow { context: "write-off" })?;
        self.accounts.insert(lender, after);
        debug!(%lender, %borrower, %amount, "Loan written off");
        self.append(period, FlowKind::WriteOff, lender, borrower, amount)?;
        Ok(amount)
    }

    /// Write off every loan owed by `borrower`, lender by lender.
    ///
    /// Returns the total written off.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if a lender account is missing.
    pub fn write_off_all(&mut self, period: u64, borrower: AgentRef) -> Result<Decimal, LedgerError> {
        let lenders: Vec<AgentRef> = self
            .loans
            .keys()
            .filter(|(_, b)| *b == borrower)
            .map(|(lender, _)| *lender)
            .collect();
        let mut total = Decimal::ZERO;
        for lender in lenders {
            let amount = self.write_off(period, lender, borrower)?;
            total = total.saturating_add(amount);
        }
        Ok(total)
    }

    /// Recover up to `shortfall` for a failed lender from every ordinary
    /// account with a positive balance, pro rata to balance.
    ///
    /// Returns the amount actually collected, which is less than
    /// `shortfall` only if depositors hold less in total.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if `lender` is not a lender or the shortfall
    /// is not positive.
    pub fn bail_in(
        &mut self,
        period: u64,
        lender: AgentRef,
        shortfall: Decimal,
    ) -> Result<Decimal, LedgerError> {
        require_positive(shortfall)?;
        if !self.lenders.contains(&lender) {
            return Err(LedgerError::NotALender { holder: lender });
        }

        let depositors: Vec<(AgentRef, Decimal)> = self
            .accounts
            .iter()
            .filter(|(holder, balance)| {
                !self.lenders.contains(*holder) && balance.is_sign_positive() && !balance.is_zero()
            })
            .map(|(holder, balance)| (*holder, *balance))
            .collect();
        let total: Decimal = depositors
            .iter()
            .fold(Decimal::ZERO, |acc, (_, balance)| acc.saturating_add(*balance));
        if total.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let target = shortfall.min(total);

        let mut collected = Decimal::ZERO;
        for (holder, balance) in depositors {
            let share = balance
                .checked_mul(target)
                .and_then(|v| v.checked_div(total))
                .ok_or(LedgerError::Overflow { context: "bail-in share" })?
                .round_dp_with_strategy(BAIL_IN_SCALE, rust_decimal::RoundingStrategy::ToZero)
                .min(balance);
            if share.is_zero() {
                continue;
            }
            self.debit_funded(holder, share)?;
            self.credit(lender, share)?;
            self.append(period, FlowKind::BailIn, holder, lender, share)?;
            collected = collected.saturating_add(share);
        }

        debug!(%lender, %shortfall, %collected, "Bail-in applied");
        Ok(collected)
    }

    /// Principal `borrower` owes `lender`.
    pub fn debt(&self, lender: AgentRef, borrower: AgentRef) -> Decimal {
        self.loans
            .get(&(lender, borrower))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Total principal owed by `borrower` to all lenders.
    pub fn debt_of(&self, borrower: AgentRef) -> Decimal {
        self.loans
            .iter()
            .filter(|((_, b), _)| *b == borrower)
            .fold(Decimal::ZERO, |acc, (_, amount)| acc.saturating_add(*amount))
    }

    /// Total principal owed to `lender`.
    pub fn loans_granted_by(&self, lender: AgentRef) -> Decimal {
        self.loans
            .iter()
            .filter(|((l, _), _)| *l == lender)
            .fold(Decimal::ZERO, |acc, (_, amount)| acc.saturating_add(*amount))
    }

    /// Lenders `borrower` currently owes money to, with the principal.
    pub fn creditors_of(&self, borrower: AgentRef) -> Vec<(AgentRef, Decimal)> {
        self.loans
            .iter()
            .filter(|((_, b), _)| *b == borrower)
            .map(|((lender, _), amount)| (*lender, *amount))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Sum of every account balance (lenders' own accounts included).
    pub fn total_deposits(&self) -> Decimal {
        self.accounts
            .values()
            .fold(Decimal::ZERO, |acc, balance| acc.saturating_add(*balance))
    }

    /// Sum of every outstanding loan.
    pub fn total_loans(&self) -> Decimal {
        self.loans
            .values()
            .fold(Decimal::ZERO, |acc, amount| acc.saturating_add(*amount))
    }

    /// Money position of all agents of `sector`.
    pub fn sector_balance(&self, sector: SectorId) -> SectorBalance {
        let mut out = SectorBalance::default();
        for (holder, balance) in &self.accounts {
            if holder.sector == sector {
                out.deposits = out.deposits.saturating_add(*balance);
            }
        }
        for ((lender, borrower), amount) in &self.loans {
            if borrower.sector == sector {
                out.loans_outstanding = out.loans_outstanding.saturating_add(*amount);
            }
            if lender.sector == sector {
                out.loans_granted = out.loans_granted.saturating_add(*amount);
            }
        }
        out
    }

    /// Check that deposits equal loans.
    pub fn verify_conservation(&self) -> ConservationResult {
        conservation::verify_conservation(self.total_deposits(), self.total_loans())
    }

    // -----------------------------------------------------------------------
    // Journal
    // -----------------------------------------------------------------------

    /// Number of journal entries.
    pub const fn len(&self) -> usize {
        self.journal.len()
    }

    /// Whether the journal is empty.
    pub const fn is_empty(&self) -> bool {
        self.journal.is_empty()
    }

    /// Journal entries of one period, in insertion order.
    pub fn flows(&self, period: u64) -> impl Iterator<Item = &Flow> + '_ {
        self.journal.iter().filter(move |flow| flow.period == period)
    }

    /// Total amount per flow kind for one period.
    pub fn flow_totals(&self, period: u64) -> BTreeMap<FlowKind, Decimal> {
        let mut totals = BTreeMap::new();
        for flow in self.flows(period) {
            let total = totals.entry(flow.kind).or_insert(Decimal::ZERO);
            *total = total.saturating_add(flow.amount);
        }
        totals
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_account(&self, holder: AgentRef) -> Result<(), LedgerError> {
        if self.accounts.contains_key(&holder) {
            Ok(())
        } else {
            Err(LedgerError::UnknownAccount { holder })
        }
    }

    /// Debit `holder`, refusing to go below zero.
    fn debit_funded(&mut self, holder: AgentRef, amount: Decimal) -> Result<(), LedgerError> {
        let available = self.balance(holder)?;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                holder,
                requested: amount,
                available,
            });
        }
        let after = available
            .checked_sub(amount)
            .ok_or(LedgerError::Overflow { context: "debit" })?;
        self.accounts.insert(holder, after);
        Ok(())
    }

    fn credit(&mut self, holder: AgentRef, amount: Decimal) -> Result<(), LedgerError> {
        let balance = self.balance(holder)?;
        let after = balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { context: "credit" })?;
        self.accounts.insert(holder, after);
        Ok(())
    }

    fn reduce_principal(&mut self, lender: AgentRef, borrower: AgentRef, amount: Decimal) {
        let key = (lender, borrower);
        let remaining = self.debt(lender, borrower).saturating_sub(amount);
        if remaining.is_zero() {
            self.loans.remove(&key);
        } else {
            self.loans.insert(key, remaining);
        }
    }

    fn append(
        &mut self,
        period: u64,
        kind: FlowKind,
        from: AgentRef,
        to: AgentRef,
        amount: Decimal,
    ) -> Result<&Flow, LedgerError> {
        self.journal.push(Flow {
            period,
            kind,
            from,
            to,
            amount,
        });
        self.journal
            .last()
            .ok_or(LedgerError::Internal("failed to retrieve flow after append"))
    }
}

fn require_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(LedgerError::NonPositiveAmount { amount });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn bank() -> AgentRef {
        AgentRef::new(SectorId(2), 0)
    }

    fn firm() -> AgentRef {
        AgentRef::new(SectorId(0), 0)
    }

    fn worker(n: u32) -> AgentRef {
        AgentRef::new(SectorId(1), n)
    }

    fn setup() -> Ledger {
        let mut ledger = Ledger::new();
        ledger.open_lender(bank()).unwrap();
        ledger.open_account(firm()).unwrap();
        ledger.open_account(worker(0)).unwrap();
        ledger.open_account(worker(1)).unwrap();
        ledger
    }

    #[test]
    fn duplicate_account_rejected() {
        let mut ledger = setup();
        assert!(matches!(
            ledger.open_account(firm()),
            Err(LedgerError::DuplicateAccount { .. })
        ));
    }

    #[test]
    fn lending_creates_money() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(100)).unwrap();
        assert_eq!(ledger.balance(firm()).unwrap(), dec!(100));
        assert_eq!(ledger.debt(bank(), firm()), dec!(100));
        assert_eq!(ledger.total_deposits(), ledger.total_loans());
    }

    #[test]
    fn only_lenders_lend() {
        let mut ledger = setup();
        assert!(matches!(
            ledger.lend(0, firm(), worker(0), dec!(1)),
            Err(LedgerError::NotALender { .. })
        ));
    }

    #[test]
    fn transfer_requires_funds() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(10)).unwrap();
        let err = ledger
            .transfer(0, FlowKind::Wage, firm(), worker(0), dec!(11))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        ledger
            .transfer(0, FlowKind::Wage, firm(), worker(0), dec!(10))
            .unwrap();
        assert_eq!(ledger.balance(firm()).unwrap(), Decimal::ZERO);
        assert_eq!(ledger.balance(worker(0)).unwrap(), dec!(10));
    }

    #[test]
    fn transfer_rejects_credit_kinds_and_bad_amounts() {
        let mut ledger = setup();
        assert!(matches!(
            ledger.transfer(0, FlowKind::LoanIssued, bank(), firm(), dec!(1)),
            Err(LedgerError::InvalidFlowKind { .. })
        ));
        assert!(matches!(
            ledger.transfer(0, FlowKind::Sale, worker(0), firm(), Decimal::ZERO),
            Err(LedgerError::NonPositiveAmount { .. })
        ));
    }

    #[test]
    fn repayment_destroys_money() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(50)).unwrap();
        ledger.repay(1, bank(), firm(), dec!(20)).unwrap();
        assert_eq!(ledger.debt(bank(), firm()), dec!(30));
        assert_eq!(ledger.total_deposits(), dec!(30));

        let err = ledger.repay(1, bank(), firm(), dec!(31)).unwrap_err();
        assert!(matches!(err, LedgerError::RepaymentExceedsDebt { .. }));

        ledger.repay(2, bank(), firm(), dec!(30)).unwrap();
        assert_eq!(ledger.debt_of(firm()), Decimal::ZERO);
        assert_eq!(ledger.verify_conservation(), ConservationResult::Balanced);
    }

    #[test]
    fn write_off_hits_lender_equity() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(40)).unwrap();
        ledger
            .transfer(0, FlowKind::Wage, firm(), worker(0), dec!(40))
            .unwrap();

        let written = ledger.write_off_all(1, firm()).unwrap();
        assert_eq!(written, dec!(40));
        assert_eq!(ledger.balance(bank()).unwrap(), dec!(-40));
        assert_eq!(ledger.total_loans(), Decimal::ZERO);
        assert_eq!(ledger.verify_conservation(), ConservationResult::Balanced);
        assert_eq!(ledger.write_off(1, bank(), firm()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn bail_in_is_pro_rata() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(100)).unwrap();
        ledger
            .transfer(0, FlowKind::Wage, firm(), worker(0), dec!(30))
            .unwrap();
        ledger
            .transfer(0, FlowKind::Wage, firm(), worker(1), dec!(10))
            .unwrap();
        // firm 60, worker0 30, worker1 10; write off the firm's loan.
        ledger.write_off(1, bank(), firm()).unwrap();
        assert_eq!(ledger.balance(bank()).unwrap(), dec!(-100));

        let collected = ledger.bail_in(1, bank(), dec!(100)).unwrap();
        assert_eq!(collected, dec!(100));
        assert_eq!(ledger.balance(bank()).unwrap(), Decimal::ZERO);
        assert_eq!(ledger.balance(firm()).unwrap(), Decimal::ZERO);
        assert_eq!(ledger.balance(worker(0)).unwrap(), Decimal::ZERO);
        assert_eq!(ledger.verify_conservation(), ConservationResult::Balanced);
    }

    #[test]
    fn bail_in_partial_when_depositors_are_short() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(10)).unwrap();
        ledger.write_off(0, bank(), firm()).unwrap();
        // Firm still holds the 10 it borrowed; the bank is at -10.
        let collected = ledger.bail_in(0, bank(), dec!(25)).unwrap();
        assert_eq!(collected, dec!(10));
        assert_eq!(ledger.balance(bank()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn flow_totals_per_period() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(20)).unwrap();
        ledger
            .transfer(0, FlowKind::Wage, firm(), worker(0), dec!(5))
            .unwrap();
        ledger
            .transfer(0, FlowKind::Wage, firm(), worker(1), dec!(5))
            .unwrap();
        ledger
            .transfer(1, FlowKind::Sale, worker(0), firm(), dec!(2))
            .unwrap();

        let totals = ledger.flow_totals(0);
        assert_eq!(totals.get(&FlowKind::Wage), Some(&dec!(10)));
        assert_eq!(totals.get(&FlowKind::LoanIssued), Some(&dec!(20)));
        assert!(!totals.contains_key(&FlowKind::Sale));
        assert_eq!(ledger.flows(1).count(), 1);
        assert_eq!(ledger.len(), 4);
    }

    #[test]
    fn sector_balances() {
        let mut ledger = setup();
        ledger.lend(0, bank(), firm(), dec!(20)).unwrap();
        ledger
            .transfer(0, FlowKind::Wage, firm(), worker(1), dec!(8))
            .unwrap();

        let firms = ledger.sector_balance(SectorId(0));
        assert_eq!(firms.deposits, dec!(12));
        assert_eq!(firms.loans_outstanding, dec!(20));
        let households = ledger.sector_balance(SectorId(1));
        assert_eq!(households.deposits, dec!(8));
        let banks = ledger.sector_balance(SectorId(2));
        assert_eq!(banks.loans_granted, dec!(20));
    }
}
