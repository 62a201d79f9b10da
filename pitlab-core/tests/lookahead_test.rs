//! Look-ahead contamination tests.
//!
//! Invariant: nothing decided at date D may depend on observations after D.
//! The only sanctioned exception is the forward liquidation window, which
//! can force a sale but never an allocation.
//!
//! Method: compute on a truncated panel and on the full panel (or on the full
//! panel with every row after D mutated) and assert the results through D
//! are identical.

use chrono::{Duration, NaiveDate};
use pitlab_core::components::{EqualWeight, MomentumPreselection, Preselection};
use pitlab_core::data::AssetPanel;
use pitlab_core::eligibility::compute_eligibility;
use pitlab_core::{PitSettings, RebalanceFrequency, SimulationConfig, TemporalSimulationEngine};
use proptest::prelude::*;
use std::sync::Arc;

/// Deterministic pseudo-random returns, with each asset starting at a
/// different row so eligibility actually varies.
fn make_returns(n: usize, assets: usize) -> AssetPanel {
    let base = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    let dates = (0..n).map(|i| base + Duration::days(i as i64)).collect();
    let cols = (0..assets)
        .map(|j| {
            let start = j * 17;
            let col = (0..n)
                .map(|i| {
                    if i < start {
                        return f64::NAN;
                    }
                    let seed = ((i * 31 + j * 7) as u64)
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    ((seed >> 33) % 200) as f64 / 10_000.0 - 0.01
                })
                .collect();
            (format!("S{j:02}"), col)
        })
        .collect();
    AssetPanel::from_columns(dates, cols).unwrap()
}

fn prices_from(returns: &AssetPanel) -> AssetPanel {
    let cols = returns
        .assets()
        .iter()
        .enumerate()
        .map(|(j, a)| {
            let mut level = 100.0;
            let col = returns
                .column(j)
                .map(|r| {
                    if r.is_finite() {
                        level *= 1.0 + r;
                        level
                    } else {
                        f64::NAN
                    }
                })
                .collect();
            (a.clone(), col)
        })
        .collect();
    AssetPanel::from_columns(returns.dates().to_vec(), cols).unwrap()
}

#[test]
fn eligibility_identical_on_truncated_and_full_data() {
    let full = make_returns(300, 8);
    for cut in [40, 90, 150, 299] {
        let date = full.dates()[cut];
        let truncated = full.truncate_through(date);
        for (days, rows) in [(1, 1), (30, 20), (60, 45)] {
            assert_eq!(
                compute_eligibility(&truncated, date, days, rows).unwrap(),
                compute_eligibility(&full, date, days, rows).unwrap(),
                "eligibility leaked future data at row {cut}"
            );
        }
    }
}

#[test]
fn preselection_identical_on_truncated_and_full_data() {
    let full = make_returns(200, 6);
    let pre = MomentumPreselection::new(Some(30));
    for cut in [50, 120, 199] {
        let date = full.dates()[cut];
        assert_eq!(
            pre.select_assets(&full.truncate_through(date), date),
            pre.select_assets(&full, date)
        );
    }
}

proptest! {
    /// Mutating any cell after D never changes the mask at D.
    #[test]
    fn eligibility_ignores_mutations_after_date(
        cut in 10usize..150,
        mutations in prop::collection::vec((0usize..1000, 0usize..5, prop::option::of(-0.5..0.5f64)), 1..40),
        min_days in 1u32..60,
        min_rows in 1u32..40,
    ) {
        let original = make_returns(160, 5);
        let date = original.dates()[cut];
        let mut mutated = original.clone();
        let future_rows = original.n_rows() - cut - 1;
        for (row, col, value) in mutations {
            let row = cut + 1 + row % future_rows;
            mutated.set(row, col, value.unwrap_or(f64::NAN));
        }
        prop_assert_eq!(
            compute_eligibility(&original, date, min_days, min_rows).unwrap(),
            compute_eligibility(&mutated, date, min_days, min_rows).unwrap()
        );
    }
}

/// Rows far enough ahead (beyond the liquidation window) cannot influence
/// any equity value or rebalance up to D.
#[test]
fn engine_history_unchanged_by_distant_future() {
    let returns = make_returns(400, 6);
    let prices = prices_from(&returns);
    let start = returns.dates()[0];
    let end = *returns.dates().last().unwrap();
    let cut = 250;
    let cut_date = returns.dates()[cut];

    let mut future_returns = returns.clone();
    let mut future_prices = prices.clone();
    for i in (cut + 10)..returns.n_rows() {
        for j in 0..returns.n_assets() {
            future_returns.set(i, j, 0.05);
            future_prices.set(i, j, prices.get(i, j) * 3.0);
        }
    }

    let cfg = SimulationConfig::builder(start, end, 1_000_000.0)
        .frequency(RebalanceFrequency::Weekly)
        .commission(0.0005, 0.0)
        .lookback_rows(40)
        .pit(PitSettings::enabled(30, 20))
        .build()
        .unwrap();
    let engine = TemporalSimulationEngine::builder(cfg, Arc::new(EqualWeight))
        .preselection(Arc::new(MomentumPreselection::new(Some(40))))
        .top_k(Some(3))
        .build()
        .unwrap();

    let base = engine.run(&prices, &returns).unwrap();
    let changed = engine.run(&future_prices, &future_returns).unwrap();

    let through = |r: &pitlab_core::SimulationResult| {
        (
            r.equity_curve
                .iter()
                .filter(|p| p.date <= cut_date)
                .cloned()
                .collect::<Vec<_>>(),
            r.events
                .iter()
                .filter(|e| e.date <= cut_date)
                .cloned()
                .collect::<Vec<_>>(),
        )
    };
    assert_eq!(through(&base), through(&changed));
}
