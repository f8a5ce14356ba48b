//! The balance-sheet matrix.
//!
//! A [`BalanceSheetMatrix`] maps `(row, line)` to an amount, where a row is a
//! sector (or agent) label and a line is a balance-sheet item. The Circuit
//! builds one per period from ledger aggregates and from the lines each
//! sector contributes. Consumers (the matrix display, report exporters)
//! treat it as opaque beyond that mapping.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A balance-sheet item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BalanceLine {
    /// Money held at the banking system (asset of the holder).
    Deposits,
    /// Principal owed (liability of the borrower).
    LoansOutstanding,
    /// Principal lent (asset of the lender).
    LoansGranted,
    /// Stock of unsold goods at valuation price.
    Inventories,
    /// Assets minus liabilities.
    NetWorth,
}

impl BalanceLine {
    /// Column label for displays.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Deposits => "Deposits",
            Self::LoansOutstanding => "Loans (liab.)",
            Self::LoansGranted => "Loans (assets)",
            Self::Inventories => "Inventories",
            Self::NetWorth => "Net worth",
        }
    }
}

/// One row of the matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    /// Row label (sector or agent identity).
    pub label: String,
    /// Amount per line.
    pub cells: BTreeMap<BalanceLine, Decimal>,
}

/// Aggregate balances by row and line for one period.
///
/// Rows keep their insertion order, which the Circuit aligns with sector
/// registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheetMatrix {
    rows: Vec<MatrixRow>,
}

impl BalanceSheetMatrix {
    /// Create an empty matrix.
    pub const fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Overwrite the cell at `(row, line)`.
    pub fn set(&mut self, row: &str, line: BalanceLine, amount: Decimal) {
        self.update(row, |cells| {
            cells.insert(line, amount);
        });
    }

    /// Add `amount` to the cell at `(row, line)`.
    pub fn add(&mut self, row: &str, line: BalanceLine, amount: Decimal) {
        self.update(row, |cells| {
            let cell = cells.entry(line).or_insert(Decimal::ZERO);
            *cell = cell.saturating_add(amount);
        });
    }

    /// Value at `(row, line)`, if set.
    pub fn get(&self, row: &str, line: BalanceLine) -> Option<Decimal> {
        self.rows
            .iter()
            .find(|r| r.label == row)
            .and_then(|r| r.cells.get(&line).copied())
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[MatrixRow] {
        &self.rows
    }

    /// Every `((row, line), amount)` cell, row by row.
    pub fn cells(&self) -> impl Iterator<Item = ((&str, BalanceLine), Decimal)> + '_ {
        self.rows.iter().flat_map(|row| {
            row.cells
                .iter()
                .map(move |(line, amount)| ((row.label.as_str(), *line), *amount))
        })
    }

    /// Sum of one line across rows.
    pub fn column_total(&self, line: BalanceLine) -> Decimal {
        self.rows
            .iter()
            .filter_map(|row| row.cells.get(&line))
            .fold(Decimal::ZERO, |acc, amount| acc.saturating_add(*amount))
    }

    fn update(&mut self, row: &str, apply: impl FnOnce(&mut BTreeMap<BalanceLine, Decimal>)) {
        if let Some(existing) = self.rows.iter_mut().find(|r| r.label == row) {
            apply(&mut existing.cells);
            return;
        }
        let mut cells = BTreeMap::new();
        apply(&mut cells);
        self.rows.push(MatrixRow {
            label: row.to_owned(),
            cells,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn rows_keep_insertion_order() {
        let mut m = BalanceSheetMatrix::new();
        m.set("firms", BalanceLine::Deposits, dec!(3));
        m.set("households", BalanceLine::Deposits, dec!(7));
        m.set("banks", BalanceLine::LoansGranted, dec!(10));
        let labels: Vec<&str> = m.rows().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["firms", "households", "banks"]);
    }

    #[test]
    fn add_accumulates_and_totals() {
        let mut m = BalanceSheetMatrix::new();
        m.add("firms", BalanceLine::Inventories, dec!(2));
        m.add("firms", BalanceLine::Inventories, dec!(3));
        m.set("households", BalanceLine::Inventories, dec!(1));
        assert_eq!(m.get("firms", BalanceLine::Inventories), Some(dec!(5)));
        assert_eq!(m.column_total(BalanceLine::Inventories), dec!(6));
        assert_eq!(m.get("firms", BalanceLine::NetWorth), None);
        assert_eq!(m.cells().count(), 2);
    }

    #[test]
    fn serializes_to_json() {
        let mut m = BalanceSheetMatrix::new();
        m.set("banks", BalanceLine::NetWorth, dec!(-4));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["rows"][0]["label"], "banks");
    }
}
