//! Full-economy runs: reproducibility, money conservation and the
//! accounting identities of the balance-sheet matrix.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use macrosim_core::{Circuit, SimulationConfig};
use macrosim_ledger::BalanceLine;
use macrosim_sectors::{EconomyConfig, build_economy};
use macrosim_types::RunStatus;
use rust_decimal::Decimal;

const PERIODS: u64 = 48;

fn economy(seed: u64) -> Circuit {
    let mut config = SimulationConfig::default();
    config.world.seed = seed;
    config.time.horizon_periods = 0;
    let mut circuit = Circuit::new(&config).unwrap();
    for sector in build_economy(&EconomyConfig::default()) {
        circuit.register_sector(sector).unwrap();
    }
    circuit
}

#[test]
fn economy_runs_to_completion() {
    let mut circuit = economy(42);
    let outcome = circuit.run(PERIODS).unwrap();
    assert_eq!(outcome.status, RunStatus::Terminal, "{:?}", outcome.cause);
    assert_eq!(outcome.periods_completed, PERIODS);
    assert!(circuit.ledger().verify_conservation().is_balanced());
}

#[test]
fn same_seed_same_history() {
    let mut first = economy(9);
    let mut second = economy(9);
    first.run(PERIODS).unwrap();
    second.run(PERIODS).unwrap();

    let a = serde_json::to_string(&first.export(..)).unwrap();
    let b = serde_json::to_string(&second.export(..)).unwrap();
    assert_eq!(a, b);
    assert_eq!(first.markers(..), second.markers(..));
}

#[test]
fn labour_and_goods_markets_clear_something() {
    let mut circuit = economy(3);
    circuit.run(PERIODS).unwrap();

    let hired = circuit.query_metric("firms.employment", 0..1);
    assert!(hired.points()[0].value > Decimal::ZERO);
    let employed = circuit.query_metric("households.employment", 0..1);
    assert_eq!(employed.points()[0].value, hired.points()[0].value);

    let output = circuit.query_metric("firms.output", 0..1);
    assert!(output.points()[0].value > Decimal::ZERO);

    // Goods produced in period 0 are first offered in period 1.
    let consumed = circuit.query_metric("households.consumption.volume", 1..2);
    let sold = circuit.query_metric("firms.sales.volume", 1..2);
    assert!(consumed.points()[0].value > Decimal::ZERO);
    assert_eq!(consumed.points()[0].value, sold.points()[0].value);
}

#[test]
fn wages_are_paid_in_money_created_by_loans() {
    let mut circuit = economy(5);
    circuit.run(1).unwrap();

    let wage_bill = circuit.query_metric("firms.wage_bill", ..).points()[0].value;
    let wages = circuit.query_metric("ledger.flows.wages", ..).points()[0].value;
    let issued = circuit
        .query_metric("ledger.flows.loans_issued", ..)
        .points()[0]
        .value;
    assert_eq!(wage_bill, wages);
    assert!(issued >= wages);
    assert!(circuit.query_metric("ledger.loans", ..).points()[0].value > Decimal::ZERO);
}

#[test]
fn balance_sheet_columns_balance_every_period() {
    let mut circuit = economy(17);
    circuit.run(PERIODS).unwrap();

    for step in 0..PERIODS {
        let matrix = circuit.balance_sheet(step).unwrap();
        let deposits = matrix.column_total(BalanceLine::Deposits);
        let owed = matrix.column_total(BalanceLine::LoansOutstanding);
        let granted = matrix.column_total(BalanceLine::LoansGranted);
        assert_eq!(deposits, owed, "period {step}");
        assert_eq!(owed, granted, "period {step}");
        assert!(matrix.get("firms", BalanceLine::Inventories).is_some());
        assert!(matrix.get("households", BalanceLine::NetWorth).is_some());
        assert!(matrix.get("banks", BalanceLine::NetWorth).is_some());
    }
}

#[test]
fn failures_leave_markers() {
    let mut circuit = economy(42);
    circuit.run(PERIODS).unwrap();

    let total: Decimal = circuit
        .query_metric("circuit.agent_failures", ..)
        .values()
        .sum();
    let bankruptcies: Decimal = circuit
        .query_metric("firms.bankruptcies", ..)
        .values()
        .sum();
    let insolvencies: Decimal = circuit
        .query_metric("banks.insolvencies", ..)
        .values()
        .sum();
    assert_eq!(total, bankruptcies + insolvencies);

    let markers = circuit.markers(..);
    let marked_periods = circuit
        .query_metric("circuit.agent_failures", ..)
        .iter()
        .filter(|p| !p.value.is_zero())
        .count();
    assert!(markers.len() >= marked_periods);
    assert!(
        markers
            .iter()
            .all(|m| m.label == "firms bankruptcy" || m.label == "banks insolvency")
    );
}
