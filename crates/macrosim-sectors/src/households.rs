//! Workers and consumers.
//!
//! Every household offers one perishable unit of labour per period at its
//! reservation wage. During consumption, after firms have hired, it
//! compares a bounded sample of goods offers and buys the cheapest first
//! until its budget (a share of its savings) is spent. Its reservation
//! wage rises after a period in work and falls after a period without.

use std::collections::BTreeMap;

use macrosim_core::{InitContext, PhaseContext, Sector, SectorError, Target};
use macrosim_ledger::{BalanceLine, BalanceSheetMatrix, FlowKind, Ledger};
use macrosim_types::{AgentRef, Capabilities, Capability, Period, SectorId, Supply};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::HouseholdsConfig;
use crate::{FIRMS, HOUSEHOLDS, adjust, disperse, mean, money, sort_by_price};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Household {
    local: u32,
    wage: Decimal,
    employed: bool,
    consumed: Decimal,
    spent: Decimal,
}

/// The household sector.
#[derive(Debug, Clone)]
pub struct HouseholdsSector {
    config: HouseholdsConfig,
    id: Option<SectorId>,
    households: Vec<Household>,
}

impl HouseholdsSector {
    /// Build the sector; agents are created when the Circuit starts.
    pub const fn new(config: HouseholdsConfig) -> Self {
        Self {
            config,
            id: None,
            households: Vec::new(),
        }
    }
}

impl Sector for HouseholdsSector {
    fn name(&self) -> &str {
        HOUSEHOLDS
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
            .with(Capability::PublishesSupply)
            .with(Capability::ConsumesSupply)
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) -> Result<(), SectorError> {
        self.id = Some(ctx.sector());
        self.households.clear();
        for local in 0..self.config.count {
            let agent = ctx.agent(local);
            ctx.ledger().open_account(agent)?;
            let wage = disperse(ctx.rng(), self.config.initial_wage).max(self.config.min_wage);
            self.households.push(Household {
                local,
                wage,
                employed: false,
                consumed: Decimal::ZERO,
                spent: Decimal::ZERO,
            });
        }
        debug!(households = self.households.len(), "Households initialized");
        Ok(())
    }

    fn open_period(&mut self, _ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
        for household in &mut self.households {
            household.employed = false;
            household.consumed = Decimal::ZERO;
            household.spent = Decimal::ZERO;
        }
        Ok(())
    }

    fn publish_supply(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Vec<Supply>, SectorError> {
        let mut offers = Vec::with_capacity(self.households.len());
        for household in &self.households {
            let labour = Supply::new(ctx.agent(household.local), household.wage, Decimal::ONE)?;
            offers.push(labour.perishable());
        }
        Ok(offers)
    }

    fn consume(&mut self, ctx: &mut PhaseContext<'_>) -> Result<(), SectorError> {
        let goods = ctx.sector_id(FIRMS);
        let period = ctx.period().step();
        let sector = ctx.sector();
        let sample = usize::try_from(self.config.goods_sample).unwrap_or(usize::MAX);
        let (mut engine, ledger) = ctx.trade()?;

        for household in &mut self.households {
            let agent = AgentRef::new(sector, household.local);
            household.employed = engine.market().sales_by(agent).next().is_some();

            // --- Shopping ---
            if let Some(goods) = goods {
                let savings = ledger.balance(agent)?;
                let mut budget = money(savings.saturating_mul(self.config.propensity_to_consume));
                let mut quotes = engine.browse(Target::Sector(goods), sample);
                sort_by_price(&mut quotes);

                for quote in quotes {
                    if budget <= Decimal::ZERO {
                        break;
                    }
                    let Some(affordable) = budget.checked_div(quote.price) else {
                        continue;
                    };
                    let wanted = money(affordable).min(quote.remaining);
                    if wanted.is_zero() {
                        continue;
                    }
                    let Some(sale) = engine.purchase(quote.offer, agent, wanted)? else {
                        continue;
                    };
                    let cost = sale.value();
                    if cost > Decimal::ZERO {
                        ledger.transfer(period, FlowKind::Sale, agent, sale.seller, cost)?;
                    }
                    budget = budget.saturating_sub(cost);
                    household.consumed = household.consumed.saturating_add(sale.quantity);
                    household.spent = household.spent.saturating_add(cost);
                }
            }

            // --- Wage adaptation ---
            household.wage = adjust(
                household.wage,
                self.config.wage_step,
                household.employed,
                self.config.min_wage,
            );
        }
        Ok(())
    }

    fn report(&self, _period: &Period) -> BTreeMap<String, Decimal> {
        let count = self.households.len();
        let employed = self.households.iter().filter(|h| h.employed).count();
        let unemployed = count.saturating_sub(employed);
        let total_wage = self
            .households
            .iter()
            .fold(Decimal::ZERO, |acc, h| acc.saturating_add(h.wage));
        let consumed = self
            .households
            .iter()
            .fold(Decimal::ZERO, |acc, h| acc.saturating_add(h.consumed));
        let spent = self
            .households
            .iter()
            .fold(Decimal::ZERO, |acc, h| acc.saturating_add(h.spent));

        BTreeMap::from([
            ("employment".to_owned(), Decimal::from(employed)),
            (
                "unemployment_rate".to_owned(),
                mean(Decimal::from(unemployed), count),
            ),
            ("wage.average".to_owned(), mean(total_wage, count)),
            ("consumption.volume".to_owned(), consumed),
            ("consumption.value".to_owned(), spent),
        ])
    }

    fn balance_sheet(&self, ledger: &Ledger, matrix: &mut BalanceSheetMatrix) {
        let Some(id) = self.id else {
            return;
        };
        let balance = ledger.sector_balance(id);
        matrix.set(
            HOUSEHOLDS,
            BalanceLine::NetWorth,
            balance.deposits.saturating_sub(balance.loans_outstanding),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use macrosim_core::{Circuit, SimulationConfig};
    use rust_decimal_macros::dec;

    use super::*;

    /// Stands in for firms: sells goods at fixed prices, hires nobody.
    struct Shop {
        offers: Vec<(Decimal, Decimal)>,
    }

    impl Sector for Shop {
        fn name(&self) -> &str {
            FIRMS
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE.with(Capability::PublishesSupply)
        }

        fn publish_supply(&mut self, ctx: &mut PhaseContext<'_>) -> Result<Vec<Supply>, SectorError> {
            let mut out = Vec::new();
            for (local, (price, quantity)) in (0_u32..).zip(&self.offers) {
                out.push(Supply::new(ctx.agent(local), *price, *quantity)?);
            }
            Ok(out)
        }

        fn report(&self, _period: &Period) -> BTreeMap<String, Decimal> {
            BTreeMap::new()
        }
    }

    #[test]
    fn unemployed_households_lower_their_wage() {
        let config = HouseholdsConfig {
            count: 4,
            ..HouseholdsConfig::default()
        };
        let mut circuit = Circuit::new(&SimulationConfig::default()).unwrap();
        circuit
            .register_sector(Box::new(HouseholdsSector::new(config)))
            .unwrap();
        circuit.run(3).unwrap();

        let employment = circuit.query_metric("households.employment", ..);
        assert!(employment.values().all(|v| v.is_zero()));
        let rate = circuit.query_metric("households.unemployment_rate", ..);
        assert!(rate.values().all(|v| v == dec!(1)));
        let wages: Vec<Decimal> = circuit
            .query_metric("households.wage.average", ..)
            .values()
            .collect();
        assert!(wages.windows(2).all(|w| w[1] < w[0]), "{wages:?}");
    }

    #[test]
    fn penniless_households_buy_nothing() {
        let mut circuit = Circuit::new(&SimulationConfig::default()).unwrap();
        circuit
            .register_sector(Box::new(Shop {
                offers: vec![(dec!(1), dec!(100))],
            }))
            .unwrap();
        circuit
            .register_sector(Box::new(HouseholdsSector::new(HouseholdsConfig::default())))
            .unwrap();
        circuit.run(2).unwrap();

        let consumed = circuit.query_metric("households.consumption.volume", ..);
        assert_eq!(consumed.len(), 2);
        assert!(consumed.values().all(|v| v.is_zero()));
        assert!(circuit.ledger().verify_conservation().is_balanced());
    }
}
