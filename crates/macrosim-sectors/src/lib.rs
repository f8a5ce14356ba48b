//! A small monetary economy built on the macrosim kernel.
//!
//! Three sectors trade through the kernel's market and ledger:
//!
//! - [`firms`] -- Hire labour on bank credit, produce goods, sell them from
//!   inventory, service their debt, and restart after bankruptcy.
//! - [`households`] -- Sell one unit of labour per period at a reservation
//!   wage and spend part of their savings on the cheapest goods they find.
//! - [`banks`] -- Hold the lender accounts firms borrow from and absorb
//!   write-offs, recovering negative equity by bail-in.
//! - [`config`] -- The `firms`, `households` and `banks` YAML sections.
//!
//! Registration order matters: firms hire during consumption before
//! households shop, so wages are spendable in the same period. Use
//! [`build_economy`] to get the sectors in that order.

pub mod banks;
pub mod config;
pub mod firms;
pub mod households;

use macrosim_core::{Quote, Sector};
use rand::Rng;
use rand::rngs::StdRng;
use rust_decimal::{Decimal, RoundingStrategy};

pub use banks::BanksSector;
pub use config::{BanksConfig, EconomyConfig, FirmsConfig, HouseholdsConfig};
pub use firms::FirmsSector;
pub use households::HouseholdsSector;

/// Registered name of the producer sector.
pub const FIRMS: &str = "firms";

/// Registered name of the household sector.
pub const HOUSEHOLDS: &str = "households";

/// Registered name of the lender sector.
pub const BANKS: &str = "banks";

/// Decimal places kept on prices, wages and payments.
const MONEY_SCALE: u32 = 2;

/// Largest initial dispersion, in basis points, around a configured price.
const DISPERSION_BPS: i64 = 1000;

/// The demonstration economy in registration order: firms, households,
/// banks.
pub fn build_economy(config: &EconomyConfig) -> Vec<Box<dyn Sector>> {
    vec![
        Box::new(FirmsSector::new(config.firms.clone(), config.banks.clone())),
        Box::new(HouseholdsSector::new(config.households.clone())),
        Box::new(BanksSector::new(config.banks.clone())),
    ]
}

/// Round a money amount down to [`MONEY_SCALE`] places.
pub(crate) fn money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero)
}

/// Raise or lower `value` by the relative `step`, never below `floor`.
pub(crate) fn adjust(value: Decimal, step: Decimal, up: bool, floor: Decimal) -> Decimal {
    let factor = if up {
        Decimal::ONE.saturating_add(step)
    } else {
        Decimal::ONE.saturating_sub(step)
    };
    money(value.saturating_mul(factor)).max(floor)
}

/// `value` moved by a uniform random amount of up to ten percent.
pub(crate) fn disperse(rng: &mut StdRng, value: Decimal) -> Decimal {
    let bps: i64 = rng.random_range(-DISPERSION_BPS..=DISPERSION_BPS);
    let factor = Decimal::ONE.saturating_add(Decimal::new(bps, 4));
    money(value.saturating_mul(factor))
}

/// Cheapest first; ties keep offer order so runs stay reproducible.
pub(crate) fn sort_by_price(quotes: &mut [Quote]) {
    quotes.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.offer.cmp(&b.offer)));
}

/// Mean of `total` over `count` items, zero when there are none.
pub(crate) fn mean(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    total
        .checked_div(Decimal::from(count))
        .map_or(Decimal::ZERO, |m| m.round_dp(4))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn economy_order_is_firms_households_banks() {
        let sectors = build_economy(&EconomyConfig::default());
        let names: Vec<&str> = sectors.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec![FIRMS, HOUSEHOLDS, BANKS]);
    }

    #[test]
    fn adjust_respects_floor() {
        assert_eq!(adjust(dec!(10), dec!(0.05), true, dec!(1)), dec!(10.50));
        assert_eq!(adjust(dec!(10), dec!(0.05), false, dec!(1)), dec!(9.50));
        assert_eq!(adjust(dec!(1), dec!(0.5), false, dec!(1)), dec!(1));
    }

    #[test]
    fn dispersion_stays_within_ten_percent() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let v = disperse(&mut rng, dec!(50));
            assert!(v >= dec!(45) && v <= dec!(55), "{v}");
        }
    }

    #[test]
    fn mean_of_nothing_is_zero() {
        assert_eq!(mean(dec!(10), 0), Decimal::ZERO);
        assert_eq!(mean(dec!(10), 4), dec!(2.5));
    }
}
