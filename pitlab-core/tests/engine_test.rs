//! End-to-end engine scenarios on synthetic data.
//!
//! Covers: trigger sequencing, point-in-time exclusion, forced liquidation,
//! opportunistic drift, constraint fallback, determinism, and the cash
//! invariant under costs.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use pitlab_core::components::{
    EqualWeight, MomentumPreselection, PortfolioConstraints, PortfolioStrategy, StrategyError,
};
use pitlab_core::data::{AssetPanel, FactorValueCache};
use pitlab_core::domain::RebalanceTrigger;
use pitlab_core::membership::MembershipPolicy;
use pitlab_core::{
    PitSettings, RebalanceFrequency, SimulationConfig, SimulationError, TemporalSimulationEngine,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Weekdays in `[start, end]`.
fn business_days(start: &str, end: &str) -> Vec<NaiveDate> {
    let (mut day, end) = (d(start), d(end));
    let mut out = Vec::new();
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(day);
        }
        day += Duration::days(1);
    }
    out
}

/// Geometric price path: `start_price * (1 + daily)^i`.
fn path(n: usize, start_price: f64, daily: f64) -> Vec<f64> {
    (0..n).map(|i| start_price * (1.0 + daily).powi(i as i32)).collect()
}

/// Simple returns from prices; first observation and gaps give NaN.
fn returns_of(prices: &AssetPanel) -> AssetPanel {
    let n = prices.n_rows();
    let cols = prices
        .assets()
        .iter()
        .enumerate()
        .map(|(j, a)| {
            let col: Vec<f64> = (0..n)
                .map(|i| {
                    if i == 0 {
                        return f64::NAN;
                    }
                    let (prev, cur) = (prices.get(i - 1, j), prices.get(i, j));
                    if prev.is_finite() && cur.is_finite() {
                        cur / prev - 1.0
                    } else {
                        f64::NAN
                    }
                })
                .collect();
            (a.clone(), col)
        })
        .collect();
    AssetPanel::from_columns(prices.dates().to_vec(), cols).unwrap()
}

fn config(start: &str, end: &str, frequency: RebalanceFrequency) -> SimulationConfig {
    SimulationConfig::builder(d(start), d(end), 100_000.0)
        .frequency(frequency)
        .build()
        .unwrap()
}

fn equal_weight() -> Arc<dyn PortfolioStrategy> {
    Arc::new(EqualWeight)
}

#[test]
fn monthly_two_asset_year_has_twelve_events() {
    let dates = business_days("2020-01-01", "2020-12-31");
    let n = dates.len();
    let prices = AssetPanel::from_columns(
        dates,
        vec![
            ("AAA".into(), path(n, 50.0, 0.0002)),
            ("BBB".into(), path(n, 80.0, -0.0001)),
        ],
    )
    .unwrap();
    let returns = returns_of(&prices);

    let engine = TemporalSimulationEngine::builder(
        config("2020-01-01", "2020-12-31", RebalanceFrequency::Monthly),
        equal_weight(),
    )
    .build()
    .unwrap();
    let result = engine.run(&prices, &returns).unwrap();

    assert_eq!(result.events.len(), 12);
    assert_eq!(result.events[0].trigger, RebalanceTrigger::Forced);
    assert!(result.events[1..]
        .iter()
        .all(|e| e.trigger == RebalanceTrigger::Scheduled));
    let months: Vec<u32> = result.events.iter().map(|e| e.date.month()).collect();
    assert_eq!(months, (1..=12).collect::<Vec<_>>());

    let last = result.events.last().unwrap();
    assert!((last.target_weights["AAA"] - 0.5).abs() < 1e-12);
    assert!((last.target_weights["BBB"] - 0.5).abs() < 1e-12);

    let last_row = prices.n_rows() - 1;
    let final_prices: BTreeMap<String, f64> = [
        ("AAA".to_string(), prices.get(last_row, 0)),
        ("BBB".to_string(), prices.get(last_row, 1)),
    ]
    .into();
    let weights = result.final_holdings.weights(&final_prices);
    assert!((weights["AAA"] - 0.5).abs() < 0.02, "AAA weight {}", weights["AAA"]);
    assert!((weights["BBB"] - 0.5).abs() < 0.02, "BBB weight {}", weights["BBB"]);

    assert_eq!(result.equity_curve.len(), prices.n_rows());
    assert!(result.events.iter().all(|e| e.total_cost == 0.0));
}

#[test]
fn events_are_strictly_increasing_in_date() {
    let dates = business_days("2020-01-01", "2020-06-30");
    let n = dates.len();
    let prices = AssetPanel::from_columns(
        dates,
        vec![
            ("AAA".into(), path(n, 50.0, 0.001)),
            ("BBB".into(), path(n, 80.0, -0.001)),
        ],
    )
    .unwrap();
    let engine = TemporalSimulationEngine::builder(
        config("2020-01-01", "2020-06-30", RebalanceFrequency::Weekly),
        equal_weight(),
    )
    .build()
    .unwrap();
    let result = engine.run(&prices, &returns_of(&prices)).unwrap();
    assert!(result.events.windows(2).all(|w| w[0].date < w[1].date));
    assert!(result
        .events
        .windows(2)
        .all(|w| (w[1].date - w[0].date).num_days() >= 7));
}

/// LATE starts trading in March 2020 and must stay out until it has 252
/// calendar days of history. GONE loses its last 40 rows and is sold off.
#[test]
fn pit_excludes_young_assets_and_liquidates_vanishing_ones() {
    let dates = business_days("2019-01-01", "2020-12-31");
    let n = dates.len();
    let late_start = dates.iter().position(|x| *x >= d("2020-03-02")).unwrap();
    let late: Vec<f64> = path(n, 20.0, 0.0003)
        .into_iter()
        .enumerate()
        .map(|(i, p)| if i < late_start { f64::NAN } else { p })
        .collect();
    let gone: Vec<f64> = path(n, 30.0, 0.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| if i >= n - 40 { f64::NAN } else { p })
        .collect();
    let prices = AssetPanel::from_columns(
        dates,
        vec![
            ("GONE".into(), gone),
            ("LATE".into(), late),
            ("OLD".into(), path(n, 40.0, 0.0001)),
        ],
    )
    .unwrap();
    let returns = returns_of(&prices);

    let cfg = SimulationConfig::builder(d("2020-01-01"), d("2020-12-31"), 100_000.0)
        .frequency(RebalanceFrequency::Monthly)
        .pit(PitSettings::enabled(252, 20))
        .build()
        .unwrap();
    let engine = TemporalSimulationEngine::builder(cfg, equal_weight())
        .build()
        .unwrap();
    let result = engine.run(&prices, &returns).unwrap();

    // LATE's first return is 2020-03-03, so 252 days of history land on
    // 2020-11-10; the only rebalance after that is 2020-12-01.
    for event in &result.events {
        let has_late = event.target_weights.contains_key("LATE");
        assert_eq!(
            has_late,
            event.date >= d("2020-11-10"),
            "LATE membership wrong on {}",
            event.date
        );
    }
    assert!(result
        .events
        .iter()
        .any(|e| e.target_weights.contains_key("LATE")));

    let liquidation = result
        .events
        .iter()
        .find(|e| e.liquidated.contains(&"GONE".to_string()))
        .expect("GONE should be force-liquidated");
    assert!(liquidation.trades["GONE"] < 0);
    assert!(!liquidation.target_weights.contains_key("GONE"));
    assert!(!result.final_holdings.is_held("GONE"));
}

#[test]
fn daily_rebalance_liquidates_on_last_valid_day() {
    let dates = business_days("2021-01-04", "2021-03-31");
    let n = dates.len();
    let stop = 20;
    let fading: Vec<f64> = (0..n)
        .map(|i| if i <= stop { 25.0 } else { f64::NAN })
        .collect();
    let prices = AssetPanel::from_columns(
        dates.clone(),
        vec![("KEEP".into(), vec![10.0; n]), ("FADE".into(), fading)],
    )
    .unwrap();
    let engine = TemporalSimulationEngine::builder(
        config("2021-01-04", "2021-03-31", RebalanceFrequency::Daily),
        equal_weight(),
    )
    .build()
    .unwrap();
    let result = engine.run(&prices, &returns_of(&prices)).unwrap();

    let liquidations: Vec<_> = result
        .events
        .iter()
        .filter(|e| !e.liquidated.is_empty())
        .collect();
    assert_eq!(liquidations.len(), 1);
    assert_eq!(liquidations[0].date, dates[stop]);
    assert_eq!(liquidations[0].liquidated, vec!["FADE".to_string()]);
    assert!(result
        .events
        .iter()
        .filter(|e| e.date > dates[stop])
        .all(|e| !e.target_weights.contains_key("FADE")));
}

#[test]
fn drift_past_threshold_triggers_opportunistic_rebalance() {
    let dates = business_days("2020-01-01", "2020-01-31");
    let n = dates.len();
    let jump: Vec<f64> = (0..n).map(|i| if i < 7 { 10.0 } else { 20.0 }).collect();
    let prices = AssetPanel::from_columns(
        dates.clone(),
        vec![("JUMP".into(), jump), ("FLAT".into(), vec![10.0; n])],
    )
    .unwrap();
    let cfg = SimulationConfig::builder(d("2020-01-01"), d("2020-01-31"), 100_000.0)
        .frequency(RebalanceFrequency::Monthly)
        .drift_threshold(Some(0.05))
        .build()
        .unwrap();
    let engine = TemporalSimulationEngine::builder(cfg, equal_weight())
        .build()
        .unwrap();
    let result = engine.run(&prices, &returns_of(&prices)).unwrap();

    let triggers: Vec<_> = result.events.iter().map(|e| (e.date, e.trigger)).collect();
    assert_eq!(
        triggers,
        vec![
            (dates[0], RebalanceTrigger::Forced),
            (dates[7], RebalanceTrigger::Opportunistic),
        ]
    );
}

struct Lopsided;

impl PortfolioStrategy for Lopsided {
    fn name(&self) -> &str {
        "lopsided"
    }

    fn construct(
        &self,
        returns: &AssetPanel,
        _constraints: &PortfolioConstraints,
        _asset_classes: Option<&BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, f64>, StrategyError> {
        // Sums to 0.9: always invalid.
        Ok(returns
            .assets()
            .iter()
            .map(|a| (a.clone(), 0.9 / returns.n_assets() as f64))
            .collect())
    }
}

fn small_panel() -> AssetPanel {
    let dates = business_days("2020-01-01", "2020-03-31");
    let n = dates.len();
    AssetPanel::from_columns(
        dates,
        vec![
            ("AAA".into(), path(n, 50.0, 0.0005)),
            ("BBB".into(), path(n, 60.0, 0.0)),
        ],
    )
    .unwrap()
}

#[test]
fn invalid_weights_are_a_constraint_violation() {
    let prices = small_panel();
    let engine = TemporalSimulationEngine::builder(
        config("2020-01-01", "2020-03-31", RebalanceFrequency::Monthly),
        Arc::new(Lopsided),
    )
    .build()
    .unwrap();
    let err = engine.run(&prices, &returns_of(&prices)).unwrap_err();
    match err {
        SimulationError::ConstraintViolation { date, strategy, .. } => {
            assert_eq!(date, d("2020-01-01"));
            assert_eq!(strategy, "lopsided");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn fallback_strategy_replaces_invalid_weights() {
    let prices = small_panel();
    let engine = TemporalSimulationEngine::builder(
        config("2020-01-01", "2020-03-31", RebalanceFrequency::Monthly),
        Arc::new(Lopsided),
    )
    .fallback_strategy(equal_weight())
    .build()
    .unwrap();
    let result = engine.run(&prices, &returns_of(&prices)).unwrap();
    assert_eq!(result.events.len(), 3);
    assert!(result
        .events
        .iter()
        .all(|e| (e.target_weights.values().sum::<f64>() - 1.0).abs() < 1e-9));
}

#[test]
fn identical_inputs_give_identical_results() {
    let dates = business_days("2020-01-01", "2020-12-31");
    let n = dates.len();
    let prices = AssetPanel::from_columns(
        dates,
        (0..6)
            .map(|k| {
                let drift = 0.0002 * (k as f64 - 2.5);
                (format!("A{k}"), path(n, 20.0 + k as f64, drift))
            })
            .collect(),
    )
    .unwrap();
    let returns = returns_of(&prices);
    let build = |cache: Option<Arc<FactorValueCache>>| {
        let cfg = SimulationConfig::builder(d("2020-01-01"), d("2020-12-31"), 250_000.0)
            .frequency(RebalanceFrequency::Monthly)
            .commission(0.0005, 1.0)
            .slippage_bps(5.0)
            .lookback_rows(60)
            .pit(PitSettings::enabled(10, 5))
            .build()
            .unwrap();
        let mut builder = TemporalSimulationEngine::builder(cfg, equal_weight())
            .preselection(Arc::new(MomentumPreselection::new(Some(60))))
            .top_k(Some(3))
            .membership(MembershipPolicy {
                enabled: true,
                buffer_rank: Some(4),
                min_holding_periods: 2,
                max_turnover: None,
                max_new_assets: Some(2),
                max_removed_assets: Some(1),
            });
        if let Some(cache) = cache {
            builder = builder.cache(cache);
        }
        builder.build().unwrap()
    };

    let first = build(None).run(&prices, &returns).unwrap();
    let second = build(None).run(&prices, &returns).unwrap();
    assert_eq!(first, second);

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(FactorValueCache::new(dir.path()));
    let cold = build(Some(cache.clone())).run(&prices, &returns).unwrap();
    let warm = build(Some(cache.clone())).run(&prices, &returns).unwrap();
    assert_eq!(first, cold);
    assert_eq!(first, warm);
    assert!(cache.stats().hits > 0);
}

#[test]
fn cash_never_negative_under_heavy_costs() {
    let prices = small_panel();
    let cfg = SimulationConfig::builder(d("2020-01-01"), d("2020-03-31"), 5_000.0)
        .frequency(RebalanceFrequency::Weekly)
        .commission(0.01, 25.0)
        .slippage_bps(50.0)
        .build()
        .unwrap();
    let engine = TemporalSimulationEngine::builder(cfg, equal_weight())
        .build()
        .unwrap();
    let result = engine.run(&prices, &returns_of(&prices)).unwrap();
    assert!(!result.events.is_empty());
    for event in &result.events {
        assert!(event.cash_after >= 0.0, "negative cash on {}", event.date);
        assert!(event.scale_factor <= 1.0);
    }
    assert!(result.final_holdings.cash() >= 0.0);
}

#[test]
fn window_not_covered_is_insufficient_history() {
    let prices = small_panel();
    let engine = TemporalSimulationEngine::builder(
        config("2020-01-01", "2020-06-30", RebalanceFrequency::Monthly),
        equal_weight(),
    )
    .build()
    .unwrap();
    let err = engine.run(&prices, &returns_of(&prices)).unwrap_err();
    assert!(matches!(err, SimulationError::InsufficientHistory { .. }));
}

/// The returns calendar skips the first trading day of every month, so each
/// month-start rebalance evaluates eligibility on a date between returns rows.
#[test]
fn cached_eligibility_matches_direct_on_gapped_returns_calendar() {
    let history = business_days("2019-07-01", "2020-06-30");
    let n = history.len();
    let full = AssetPanel::from_columns(
        history,
        vec![
            ("AAA".into(), path(n, 50.0, 0.0002)),
            ("BBB".into(), path(n, 80.0, -0.0001)),
        ],
    )
    .unwrap();
    let full_returns = returns_of(&full);
    let dates = full_returns.dates();
    let keep: Vec<usize> = (0..n)
        .filter(|&i| i == 0 || dates[i].month() == dates[i - 1].month())
        .collect();
    let returns = AssetPanel::from_columns(
        keep.iter().map(|&i| dates[i]).collect(),
        full_returns
            .assets()
            .iter()
            .enumerate()
            .map(|(j, a)| (a.clone(), keep.iter().map(|&i| full_returns.get(i, j)).collect()))
            .collect(),
    )
    .unwrap();
    let prices = full.slice_dates(d("2020-01-01"), d("2020-06-30"));
    assert_eq!(prices.first_date(), Some(d("2020-01-01")));
    assert!(returns.rows_through(d("2020-02-03")) == returns.rows_through(d("2020-01-31")));

    let build = |cache: Option<Arc<FactorValueCache>>| {
        let cfg = SimulationConfig::builder(d("2020-01-01"), d("2020-06-30"), 100_000.0)
            .frequency(RebalanceFrequency::Monthly)
            .pit(PitSettings::enabled(30, 10))
            .build()
            .unwrap();
        let mut builder = TemporalSimulationEngine::builder(cfg, equal_weight());
        if let Some(cache) = cache {
            builder = builder.cache(cache);
        }
        builder.build().unwrap()
    };

    let direct = build(None).run(&prices, &returns).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(FactorValueCache::new(dir.path()));
    let cold = build(Some(cache.clone())).run(&prices, &returns).unwrap();
    let warm = build(Some(cache.clone())).run(&prices, &returns).unwrap();

    assert_eq!(direct.events.len(), 6);
    assert_eq!(direct, cold);
    assert_eq!(direct, warm);
    assert_eq!(cache.stats().hits, 6);
}
