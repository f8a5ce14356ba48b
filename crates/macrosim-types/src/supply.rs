//! The supply (offer) record published by seller sectors.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::AgentRef;

/// Reasons a supply record cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupplyError {
    /// Unit price must not be negative.
    #[error("supply price must be non-negative, got {price}")]
    NegativePrice {
        /// The rejected price.
        price: Decimal,
    },

    /// Quantity must not be negative.
    #[error("supply quantity must be non-negative, got {quantity}")]
    NegativeQuantity {
        /// The rejected quantity.
        quantity: Decimal,
    },
}

/// One seller's tradeable unit for the current period.
///
/// A supply is created fresh each period by its seller's sector and never
/// mutated after publication. The market tracks the remaining quantity of
/// each published offer separately; the record itself always shows the
/// quantity as published. Supplies are discarded at period end: unsold
/// quantity is not carried over unless the sector re-publishes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supply {
    seller: AgentRef,
    price: Decimal,
    quantity: Decimal,
    perishable: bool,
}

impl Supply {
    /// Build a durable supply.
    ///
    /// # Errors
    ///
    /// Returns [`SupplyError`] if `price` or `quantity` is negative.
    pub fn new(seller: AgentRef, price: Decimal, quantity: Decimal) -> Result<Self, SupplyError> {
        if price.is_sign_negative() && !price.is_zero() {
            return Err(SupplyError::NegativePrice { price });
        }
        if quantity.is_sign_negative() && !quantity.is_zero() {
            return Err(SupplyError::NegativeQuantity { quantity });
        }
        Ok(Self {
            seller,
            price,
            quantity,
            perishable: false,
        })
    }

    /// Mark the supply as perishable (cannot be stored past the period).
    #[must_use]
    pub const fn perishable(mut self) -> Self {
        self.perishable = true;
        self
    }

    /// The selling agent (a lookup key into the seller's sector).
    pub const fn seller(&self) -> AgentRef {
        self.seller
    }

    /// Unit price.
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Quantity as published.
    pub const fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Whether the offered good perishes at period end.
    pub const fn is_perishable(&self) -> bool {
        self.perishable
    }

    /// Price times published quantity.
    pub fn value(&self) -> Decimal {
        self.price.saturating_mul(self.quantity)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::ids::SectorId;

    fn seller() -> AgentRef {
        AgentRef::new(SectorId(0), 1)
    }

    #[test]
    fn builds_valid_supply() {
        let supply = Supply::new(seller(), dec!(2.5), dec!(4)).unwrap();
        assert_eq!(supply.price(), dec!(2.5));
        assert_eq!(supply.quantity(), dec!(4));
        assert_eq!(supply.value(), dec!(10.0));
        assert!(!supply.is_perishable());
        assert!(supply.perishable().is_perishable());
    }

    #[test]
    fn rejects_negative_values() {
        assert!(matches!(
            Supply::new(seller(), dec!(-1), dec!(4)),
            Err(SupplyError::NegativePrice { .. })
        ));
        assert!(matches!(
            Supply::new(seller(), dec!(1), dec!(-0.5)),
            Err(SupplyError::NegativeQuantity { .. })
        ));
    }

    #[test]
    fn zero_quantity_is_allowed() {
        assert!(Supply::new(seller(), Decimal::ZERO, Decimal::ZERO).is_ok());
    }

    #[test]
    fn serializes_round_trip() {
        let supply = Supply::new(seller(), dec!(3), dec!(5)).unwrap();
        let json = serde_json::to_string(&supply).unwrap();
        let back: Supply = serde_json::from_str(&json).unwrap();
        assert_eq!(back, supply);
    }
}
