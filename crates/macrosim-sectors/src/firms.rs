//! Producers.
//!
//! Each firm offers its whole inventory at its current price, hires up to
//! its workforce target from the households' labour offers (borrowing the
//! wage bill it cannot pay from its own account), and produces in
//! settlement. Settlement also adapts price and workforce to what sold,
//! then services the debt: interest first, then a share of principal.
//! Interest the firm cannot pay is added to its loan. A firm whose bank
//! refuses that credit is bankrupt: its loans are written off against the
//! lending banks and it restarts with no inventory at the configured price.

use std::collections::BTreeMap;

use macrosim_core::{AgentFailure, InitContext, PhaseContext, Sector, SectorError, Target};
use macrosim_ledger::{BalanceLine, BalanceSheetMatrix, FlowKind, Ledger, LedgerError};
use macrosim_types::{AgentRef, Capabilities, Capability, FailureKind, Period, SectorId, Supply};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::{BanksConfig, FirmsConfig};
use crate::{FIRMS, HOUSEHOLDS, adjust, disperse, mean, money, sort_by_price};

/// Per-firm state.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Firm {
    local: u32,
    price: Decimal,
    inventory: Decimal,
    offered: Decimal,
    target_workforce: u32,
    workers: u32,
    wage_bill: Decimal,
    output: Decimal,
    sold: Decimal,
    revenue: Decimal,
    interest_paid: Decimal,
    bankrupt: bool,
}

impl Firm {
    fn new(local: u32, price: Decimal, workforce: u32) -> Self {
        Self {
            local,
            price,
            inventory: Decimal::ZERO,
            offered: Decimal::ZERO,
            target_workforce: workforce,
            workers: 0,
            wage_bill: Decimal::ZERO,
            output: Decimal::ZERO,
            sold: Decimal::ZERO,
            revenue: Decimal::ZERO,
            interest_paid: Decimal::ZERO,
            bankrupt: false,
        }
    }
}

/// Outcome of one firm's debt service.
enum DebtService {
    /// Interest paid in full, plus whatever principal was repaid.
    Paid { interest: Decimal },
    /// No bank would finance the interest due.
    Default { due: Decimal },
}

/// The producer sector.
#[derive(Debug, Clone)]
pub struct FirmsSector {
    config: FirmsConfig,
    credit: BanksConfig,
    id: Option<SectorId>,
    firms: Vec<Firm>,
}

impl FirmsSector {
    /// Build the sector; agents are created when the Circuit starts.
    pub const fn new(config: FirmsConfig, credit: BanksConfig) -> Self {
        Self {
            config,
            credit,
            id: None,
            firms: Vec::new(),
        }
    }

    fn agent(&self, firm: &Firm) -> Option<AgentRef> {
        self.id.map(|id| AgentRef::new(id, firm.local))
    }

    /// Adapt price and workforce target to last period's sell-through.
    fn adapt(&self, firm: &mut Firm, unsold: Decimal) {
        if firm.offered.is_zero() {
            return;
        }
        let floor = Decimal::new(1, 2);
        if unsold.is_zero() {
            firm.price = adjust(firm.price, self.config.price_step, true, floor);
            firm.target_workforce = firm
                .target_workforce
                .saturating_add(1)
                .min(self.config.max_workforce);
        } else if unsold.saturating_mul(Decimal::TWO) > firm.offered {
            firm.price = adjust(firm.price, self.config.price_step, false, floor);
            firm.target_workforce = firm.target_workforce.saturating_sub(1).max(1);
        }
    }

    fn restart(&self, firm: &mut Firm) {
        firm.price = self.config.initial_price;
        firm.inventory = Decimal::ZERO;
        firm.target_workforce = self.config.initial_workforce;
        firm.bankrupt = true;
    }
}

/// The lender a firm borrows from: banks are assigned round-robin.
fn bank_for(lenders: &[AgentRef], local: u32) -> Option<AgentRef> {
    let count = u32::try_from(lenders.len()).ok()?;
    let index = local.checked_rem(count)?;
    lenders.get(usize::try_from(index).ok()?).copied()
}

/// Make sure `agent` can pay `amount`, borrowing the shortfall if needed.
///
/// Returns `false` when no bank will lend within the ceiling.
fn finance(
    ledger: &mut Ledger,
    period: u64,
    bank: Option<AgentRef>,
    agent: AgentRef,
    amount: Decimal,
    ceiling: Decimal,
) -> Result<bool, LedgerError> {
    let balance = ledger.balance(agent)?;
    if balance >= amount {
        return Ok(true);
    }
    let Some(bank) = bank else {
        return Ok(false);
    };
    let shortfall = amount.saturating_sub(balance);
    if ledger.debt_of(agent).saturating_add(shortfall) > ceiling {
        return Ok(false);
    }
    ledger.lend(period, bank, agent, shortfall)?;
    Ok(true)
}

/// Pay interest to every creditor, then repay a share of each principal
/// from what is left.
///
/// Interest the account cannot cover is borrowed from `bank`; the firm
/// defaults only when that would break the loan ceiling.
fn service_debt(
    ledger: &mut Ledger,
    period: u64,
    agent: AgentRef,
    bank: Option<AgentRef>,
    terms: &BanksConfig,
) -> Result<DebtService, LedgerError> {
    let creditors = ledger.creditors_of(agent);
    let interest: Vec<(AgentRef, Decimal)> = creditors
        .iter()
        .map(|(bank, principal)| (*bank, money(principal.saturating_mul(terms.interest_rate))))
        .collect();
    let due = interest
        .iter()
        .fold(Decimal::ZERO, |acc, (_, amount)| acc.saturating_add(*amount));
    if !finance(ledger, period, bank, agent, due, terms.loan_ceiling)? {
        return Ok(DebtService::Default { due });
    }

    for (bank, amount) in interest {
        if amount > Decimal::ZERO {
            ledger.transfer(period, FlowKind::Interest, agent, bank, amount)?;
        }
    }
    for (bank, principal) in creditors {
        let instalment = money(principal.saturating_mul(terms.repayment_rate))
            .max(Decimal::new(1, 2))
            .min(principal);
        let amount = instalment.min(ledger.balance(agent)?);
        if amount > Decimal::ZERO {
            ledger.repay(period, bank, agent, amount)?;
        }
    }
    Ok(DebtService::Paid { interest: due })
}

impl Sector for FirmsSector {
    fn name(&self) -> &str {
        FIRMS
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
            .with(Capability::PublishesSupply)
            .with(Capability::ConsumesSupply)
            .with(Capability::Settles)
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) -> Result<(), SectorError> {
        self.id = Some(ctx.sector());
        self.firms.clear();
        for local in 0..self.config.count {
            let agent = ctx.agent(local);
            ctx.ledger().open_account(agent)?;
            let price = disperse(ctx.rng(), self.config.initial_price);
            self.firms
                .push(Firm::new(local, price, self.config.initial_workforce));
        }
        debug!(firms = self.firms.len(), "Firms initialized");
        Ok(())
    }

    fn open_period(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
        for firm in &mut self.firms {
            firm.offered = Decimal::ZERO;
            firm.workers = 0;
            firm.wage_bill = Decimal::ZERO;
            firm.output = Decimal::ZERO;
            firm.sold = Decimal::ZERO;
            firm.revenue = Decimal::ZERO;
            firm.interest_paid = Decimal::ZERO;
            firm.bankrupt = false;
        }
        Ok(())
    }

    fn publish_supply(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Vec<Supply>, SectorError> {
        let mut offers = Vec::new();
        for firm in &mut self.firms {
            if firm.inventory.is_zero() {
                continue;
            }
            firm.offered = firm.inventory;
            offers.push(Supply::new(ctx.agent(firm.local), firm.price, firm.inventory)?);
        }
        Ok(offers)
    }

    fn consume(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
        let Some(labour) = ctx.sector_id(HOUSEHOLDS) else {
            return Ok(());
        };
        let lenders: Vec<AgentRef> = ctx.ledger().lenders().collect();
        let period = ctx.period().step();
        let sector = ctx.sector();
        let ceiling = self.credit.loan_ceiling;
        let productivity = self.config.productivity;
        let per_vacancy = self.config.labour_sample;
        let (mut engine, ledger) = ctx.trade()?;

        for firm in &mut self.firms {
            let agent = AgentRef::new(sector, firm.local);
            let bank = bank_for(&lenders, firm.local);
            let max_wage = firm.price.saturating_mul(productivity);
            let sample = firm.target_workforce.saturating_mul(per_vacancy);
            let mut quotes = engine.browse(
                Target::Sector(labour),
                usize::try_from(sample).unwrap_or(usize::MAX),
            );
            sort_by_price(&mut quotes);

            for quote in quotes {
                if firm.workers >= firm.target_workforce || quote.price > max_wage {
                    break;
                }
                let live = engine
                    .market()
                    .quote(quote.offer)
                    .is_some_and(|q| !q.remaining.is_zero());
                if !live {
                    continue;
                }
                if !finance(ledger, period, bank, agent, quote.price, ceiling)? {
                    break;
                }
                let Some(sale) = engine.purchase(quote.offer, agent, Decimal::ONE)? else {
                    continue;
                };
                let wage = sale.value();
                if wage > Decimal::ZERO {
                    ledger.transfer(period, FlowKind::Wage, agent, sale.seller, wage)?;
                }
                firm.workers = firm.workers.saturating_add(1);
                firm.wage_bill = firm.wage_bill.saturating_add(wage);
            }
        }
        Ok(())
    }

    fn settle(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Vec<AgentFailure>, SectorError> {
        let period = ctx.period().step();
        let lenders: Vec<AgentRef> = ctx.ledger().lenders().collect();
        let mut failures = Vec::new();
        let mut firms = std::mem::take(&mut self.firms);

        for firm in &mut firms {
            let Some(agent) = self.agent(firm) else {
                continue;
            };

            // --- Sales ---
            let (sold, revenue) = ctx
                .market()
                .sales_by(agent)
                .fold((Decimal::ZERO, Decimal::ZERO), |(q, v), sale| {
                    (q.saturating_add(sale.quantity), v.saturating_add(sale.value()))
                });
            firm.sold = sold;
            firm.revenue = revenue;
            let unsold = firm.inventory.saturating_sub(sold);

            // --- Adaptation ---
            self.adapt(firm, unsold);

            // --- Production ---
            firm.output = self
                .config
                .productivity
                .saturating_mul(Decimal::from(firm.workers));
            firm.inventory = unsold.saturating_add(firm.output);

            // --- Debt service ---
            let bank = bank_for(&lenders, firm.local);
            match service_debt(ctx.ledger_mut()?, period, agent, bank, &self.credit)? {
                DebtService::Paid { interest } => firm.interest_paid = interest,
                DebtService::Default { due } => {
                    let written_off = ctx.ledger_mut()?.write_off_all(period, agent)?;
                    info!(%agent, %due, %written_off, "Firm bankrupt");
                    self.restart(firm);
                    failures.push(AgentFailure::new(
                        agent,
                        FailureKind::Bankruptcy,
                        format!("cannot pay interest of {due}; {written_off} written off"),
                    ));
                }
            }
        }

        self.firms = firms;
        Ok(failures)
    }

    fn report(&self, _period: &Period) -> BTreeMap<String, Decimal> {
        let sum = |f: fn(&Firm) -> Decimal| {
            self.firms
                .iter()
                .fold(Decimal::ZERO, |acc, firm| acc.saturating_add(f(firm)))
        };
        let employment: u64 = self.firms.iter().map(|f| u64::from(f.workers)).sum();
        let bankruptcies = self.firms.iter().filter(|f| f.bankrupt).count();
        let inventory_value = sum(|f| f.inventory.saturating_mul(f.price));

        BTreeMap::from([
            ("price.average".to_owned(), mean(sum(|f| f.price), self.firms.len())),
            ("inventory.volume".to_owned(), sum(|f| f.inventory)),
            ("inventory.value".to_owned(), inventory_value),
            ("output".to_owned(), sum(|f| f.output)),
            ("sales.volume".to_owned(), sum(|f| f.sold)),
            ("sales.revenue".to_owned(), sum(|f| f.revenue)),
            ("employment".to_owned(), Decimal::from(employment)),
            ("wage_bill".to_owned(), sum(|f| f.wage_bill)),
            ("interest_paid".to_owned(), sum(|f| f.interest_paid)),
            ("bankruptcies".to_owned(), Decimal::from(bankruptcies)),
        ])
    }

    fn balance_sheet(&self, ledger: &Ledger, matrix: &mut BalanceSheetMatrix) {
        let Some(id) = self.id else {
            return;
        };
        let inventories = self.firms.iter().fold(Decimal::ZERO, |acc, f| {
            acc.saturating_add(f.inventory.saturating_mul(f.price))
        });
        let balance = ledger.sector_balance(id);
        let net_worth = balance
            .deposits
            .saturating_add(inventories)
            .saturating_sub(balance.loans_outstanding);
        matrix.set(FIRMS, BalanceLine::Inventories, inventories);
        matrix.set(FIRMS, BalanceLine::NetWorth, net_worth);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const FIRM: AgentRef = AgentRef::new(SectorId(0), 0);
    const BANK: AgentRef = AgentRef::new(SectorId(2), 0);

    fn ledger_with_loan(principal: Decimal) -> Ledger {
        let mut ledger = Ledger::new();
        ledger.open_account(FIRM).unwrap();
        ledger.open_lender(BANK).unwrap();
        ledger.lend(0, BANK, FIRM, principal).unwrap();
        ledger
    }

    #[test]
    fn banks_are_assigned_round_robin() {
        let lenders = vec![BANK, AgentRef::new(SectorId(2), 1)];
        assert_eq!(bank_for(&lenders, 0), Some(BANK));
        assert_eq!(bank_for(&lenders, 3), Some(AgentRef::new(SectorId(2), 1)));
        assert_eq!(bank_for(&[], 3), None);
    }

    #[test]
    fn finance_borrows_only_the_shortfall() {
        let mut ledger = ledger_with_loan(dec!(30));
        assert!(finance(&mut ledger, 1, Some(BANK), FIRM, dec!(50), dec!(100)).unwrap());
        assert_eq!(ledger.balance(FIRM).unwrap(), dec!(50));
        assert_eq!(ledger.debt_of(FIRM), dec!(50));
    }

    #[test]
    fn finance_refuses_beyond_ceiling() {
        let mut ledger = ledger_with_loan(dec!(90));
        assert!(!finance(&mut ledger, 1, Some(BANK), FIRM, dec!(120), dec!(100)).unwrap());
        assert!(!finance(&mut ledger, 1, None, FIRM, dec!(120), dec!(1000)).unwrap());
        assert_eq!(ledger.debt_of(FIRM), dec!(90));
    }

    #[test]
    fn debt_service_pays_interest_then_principal() {
        let mut ledger = ledger_with_loan(dec!(100));
        let terms = BanksConfig::default();
        let outcome = service_debt(&mut ledger, 1, FIRM, Some(BANK), &terms).unwrap();
        assert!(matches!(outcome, DebtService::Paid { interest } if interest == dec!(1)));
        // 100 - 1 interest - 10 repaid
        assert_eq!(ledger.balance(FIRM).unwrap(), dec!(89));
        assert_eq!(ledger.debt_of(FIRM), dec!(90));
        assert_eq!(ledger.balance(BANK).unwrap(), dec!(1));
        assert!(ledger.verify_conservation().is_balanced());
    }

    #[test]
    fn unpaid_interest_is_borrowed_within_the_ceiling() {
        let mut ledger = ledger_with_loan(dec!(100));
        ledger
            .transfer(1, FlowKind::Transfer, FIRM, BANK, dec!(100))
            .unwrap();
        let terms = BanksConfig::default();
        let outcome = service_debt(&mut ledger, 1, FIRM, Some(BANK), &terms).unwrap();
        assert!(matches!(outcome, DebtService::Paid { .. }));
        assert_eq!(ledger.debt_of(FIRM), dec!(101));
        assert_eq!(ledger.balance(FIRM).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn debt_service_defaults_when_credit_is_refused() {
        let mut ledger = ledger_with_loan(dec!(100));
        ledger
            .transfer(1, FlowKind::Transfer, FIRM, BANK, dec!(100))
            .unwrap();
        let terms = BanksConfig {
            loan_ceiling: dec!(100),
            ..BanksConfig::default()
        };
        let outcome = service_debt(&mut ledger, 1, FIRM, Some(BANK), &terms).unwrap();
        assert!(matches!(outcome, DebtService::Default { due } if due == dec!(1)));
        let outcome = service_debt(&mut ledger, 1, FIRM, None, &BanksConfig::default()).unwrap();
        assert!(matches!(outcome, DebtService::Default { .. }));
    }

    #[test]
    fn adaptation_follows_sell_through() {
        let sector = FirmsSector::new(FirmsConfig::default(), BanksConfig::default());
        let mut firm = Firm::new(0, dec!(10), 3);

        firm.offered = dec!(20);
        sector.adapt(&mut firm, Decimal::ZERO);
        assert_eq!(firm.price, dec!(10.30));
        assert_eq!(firm.target_workforce, 4);

        sector.adapt(&mut firm, dec!(15));
        assert_eq!(firm.price, dec!(9.99));
        assert_eq!(firm.target_workforce, 3);

        // A little unsold stock changes nothing.
        sector.adapt(&mut firm, dec!(5));
        assert_eq!(firm.price, dec!(9.99));
        assert_eq!(firm.target_workforce, 3);
    }
}
