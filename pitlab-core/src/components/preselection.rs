//! Preselection — ranks candidate assets before membership rules apply.

use crate::data::panel::AssetPanel;
use chrono::NaiveDate;

/// Produces an ordered candidate list (best first) from returns visible at `date`.
///
/// Implementations must only read rows timestamped on or before `date`.
pub trait Preselection: Send + Sync {
    fn name(&self) -> &str;

    fn select_assets(&self, returns: &AssetPanel, date: NaiveDate) -> Vec<String>;
}

/// Ranks by trailing cumulative return, highest first.
///
/// Assets without a single observation in the window are left out. Ties are
/// broken by identifier.
#[derive(Debug, Clone, Copy)]
pub struct MomentumPreselection {
    /// Trailing rows considered; `None` uses everything visible.
    pub lookback_rows: Option<usize>,
}

impl MomentumPreselection {
    pub fn new(lookback_rows: Option<usize>) -> Self {
        Self { lookback_rows }
    }
}

impl Preselection for MomentumPreselection {
    fn name(&self) -> &str {
        "momentum"
    }

    fn select_assets(&self, returns: &AssetPanel, date: NaiveDate) -> Vec<String> {
        let visible = returns.rows_through(date);
        if visible == 0 {
            return Vec::new();
        }
        let len = self.lookback_rows.unwrap_or(visible);
        let window = returns.window_ending_at(visible - 1, len);

        let mut scored: Vec<(f64, &String)> = window
            .assets()
            .iter()
            .enumerate()
            .filter_map(|(j, asset)| {
                let mut seen = false;
                let growth = window
                    .column(j)
                    .filter(|r| r.is_finite())
                    .inspect(|_| seen = true)
                    .fold(1.0, |acc, r| acc * (1.0 + r));
                seen.then_some((growth - 1.0, asset))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().map(|(_, a)| a.clone()).collect()
    }
}
