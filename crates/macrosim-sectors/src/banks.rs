//! Lenders.
//!
//! A bank's own ledger account is its equity: interest flows in, write-offs
//! of bankrupt firms' loans flow out. Loans themselves are granted by the
//! borrowing firms against the bank's lender account. A bank whose equity
//! turns negative is insolvent and is recapitalised by bail-in from the
//! depositors of the economy.

use std::collections::BTreeMap;

use macrosim_core::{AgentFailure, InitContext, PhaseContext, Sector, SectorError};
use macrosim_ledger::{BalanceLine, BalanceSheetMatrix, Ledger};
use macrosim_types::{AgentRef, Capabilities, Capability, FailureKind, Period, SectorId};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::BANKS;
use crate::config::BanksConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Bank {
    local: u32,
    equity: Decimal,
    loans: Decimal,
    insolvent: bool,
    bailed_in: Decimal,
}

/// The lender sector.
#[derive(Debug, Clone)]
pub struct BanksSector {
    config: BanksConfig,
    id: Option<SectorId>,
    banks: Vec<Bank>,
}

impl BanksSector {
    /// Build the sector; lender accounts are opened when the Circuit
    /// starts.
    pub const fn new(config: BanksConfig) -> Self {
        Self {
            config,
            id: None,
            banks: Vec::new(),
        }
    }
}

impl Sector for BanksSector {
    fn name(&self) -> &str {
        BANKS
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.with(Capability::Settles)
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) -> Result<(), SectorError> {
        self.id = Some(ctx.sector());
        self.banks.clear();
        for local in 0..self.config.count {
            let agent = ctx.agent(local);
            ctx.ledger().open_lender(agent)?;
            self.banks.push(Bank {
                local,
                ..Bank::default()
            });
        }
        debug!(banks = self.banks.len(), "Banks initialized");
        Ok(())
    }

    fn open_period(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
        for bank in &mut self.banks {
            bank.insolvent = false;
            bank.bailed_in = Decimal::ZERO;
        }
        Ok(())
    }

    fn settle(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Vec<AgentFailure>, SectorError> {
        let period = ctx.period().step();
        let sector = ctx.sector();
        let mut failures = Vec::new();

        for bank in &mut self.banks {
            let agent = AgentRef::new(sector, bank.local);
            let equity = ctx.ledger().balance(agent)?;
            if equity.is_sign_negative() && !equity.is_zero() {
                let shortfall = equity.abs();
                let recovered = ctx.ledger_mut()?.bail_in(period, agent, shortfall)?;
                warn!(%agent, %equity, %recovered, "Bank insolvent");
                bank.insolvent = true;
                bank.bailed_in = recovered;
                failures.push(AgentFailure::new(
                    agent,
                    FailureKind::Insolvency,
                    format!("negative equity of {equity}; {recovered} recovered by bail-in"),
                ));
            }
            bank.equity = ctx.ledger().balance(agent)?;
            bank.loans = ctx.ledger().loans_granted_by(agent);
        }
        Ok(failures)
    }

    fn report(&self, _period: &Period) -> BTreeMap<String, Decimal> {
        let sum = |f: fn(&Bank) -> Decimal| {
            self.banks
                .iter()
                .fold(Decimal::ZERO, |acc, bank| acc.saturating_add(f(bank)))
        };
        let insolvencies = self.banks.iter().filter(|b| b.insolvent).count();
        BTreeMap::from([
            ("equity".to_owned(), sum(|b| b.equity)),
            ("loans".to_owned(), sum(|b| b.loans)),
            ("bail_in".to_owned(), sum(|b| b.bailed_in)),
            ("insolvencies".to_owned(), Decimal::from(insolvencies)),
        ])
    }

    fn balance_sheet(&self, ledger: &Ledger, matrix: &mut BalanceSheetMatrix) {
        let Some(id) = self.id else {
            return;
        };
        // Equity sits on the banks' own accounts; granted loans are matched
        // one for one by the deposits they created.
        matrix.set(BANKS, BalanceLine::NetWorth, ledger.sector_balance(id).deposits);
    }
}
