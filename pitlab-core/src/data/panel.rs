//! Date × asset matrices for prices and returns.
//!
//! An `AssetPanel` has a strictly ascending date axis, unique asset identifiers,
//! and row-major `f64` values. Missing observations are strict NaN (no
//! forward-fill of tradable price data).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Structural problems with a panel's shape or axes.
#[derive(Debug, Error, PartialEq)]
pub enum PanelError {
    #[error("{found} rows for {expected} dates")]
    RowCount { found: usize, expected: usize },

    #[error("row {row} has {found} values, expected {expected}")]
    RowWidth {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("column '{asset}' has {found} values, expected {expected}")]
    ColumnLength {
        asset: String,
        found: usize,
        expected: usize,
    },

    #[error("dates must be strictly ascending (violation at {date})")]
    UnsortedDates { date: NaiveDate },

    #[error("duplicate asset identifier '{0}'")]
    DuplicateAsset(String),
}

/// Aligned matrix of observations: one row per date, one column per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPanel {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    values: Vec<f64>,
}

impl AssetPanel {
    /// Build a panel from row vectors. Every row must have one value per asset.
    pub fn new(
        dates: Vec<NaiveDate>,
        assets: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, PanelError> {
        validate_axes(&dates, &assets)?;
        if rows.len() != dates.len() {
            return Err(PanelError::RowCount {
                found: rows.len(),
                expected: dates.len(),
            });
        }
        let mut values = Vec::with_capacity(dates.len() * assets.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != assets.len() {
                return Err(PanelError::RowWidth {
                    row: i,
                    found: row.len(),
                    expected: assets.len(),
                });
            }
            values.extend(row);
        }
        Ok(Self {
            dates,
            assets,
            values,
        })
    }

    /// Build a panel from named columns sharing one date axis.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, PanelError> {
        let assets: Vec<String> = columns.iter().map(|(a, _)| a.clone()).collect();
        validate_axes(&dates, &assets)?;
        for (asset, col) in &columns {
            if col.len() != dates.len() {
                return Err(PanelError::ColumnLength {
                    asset: asset.clone(),
                    found: col.len(),
                    expected: dates.len(),
                });
            }
        }
        let n_assets = assets.len();
        let mut values = vec![f64::NAN; dates.len() * n_assets];
        for (j, (_, col)) in columns.iter().enumerate() {
            for (i, v) in col.iter().enumerate() {
                values[i * n_assets + j] = *v;
            }
        }
        Ok(Self {
            dates,
            assets,
            values,
        })
    }

    /// Align per-asset series onto the union of their dates.
    ///
    /// Dates where an asset has no observation get NaN. Assets are ordered
    /// lexicographically.
    pub fn align(series: BTreeMap<String, Vec<(NaiveDate, f64)>>) -> Self {
        let all_dates: BTreeSet<NaiveDate> = series
            .values()
            .flat_map(|obs| obs.iter().map(|(d, _)| *d))
            .collect();
        let dates: Vec<NaiveDate> = all_dates.into_iter().collect();
        let assets: Vec<String> = series.keys().cloned().collect();
        let n_assets = assets.len();

        let mut values = vec![f64::NAN; dates.len() * n_assets];
        for (j, obs) in series.values().enumerate() {
            for (date, v) in obs {
                if let Ok(i) = dates.binary_search(date) {
                    values[i * n_assets + j] = *v;
                }
            }
        }
        Self {
            dates,
            assets,
            values,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// True when the panel has no rows or no assets.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.assets.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Raw value at (row, column). NaN means missing.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.assets.len() + col]
    }

    /// Finite value at (row, column), `None` when missing.
    pub fn get_finite(&self, row: usize, col: usize) -> Option<f64> {
        let v = self.get(row, col);
        v.is_finite().then_some(v)
    }

    /// Overwrite a single cell.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        let n = self.assets.len();
        self.values[row * n + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let n = self.assets.len();
        &self.values[row * n..(row + 1) * n]
    }

    /// Iterate one asset's values in date order.
    pub fn column(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        let n = self.assets.len();
        (0..self.dates.len()).map(move |i| self.values[i * n + col])
    }

    pub fn asset_index(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Number of rows timestamped on or before `date`.
    pub fn rows_through(&self, date: NaiveDate) -> usize {
        self.dates.partition_point(|d| *d <= date)
    }

    /// Index of the first non-missing observation per asset.
    pub fn first_valid_rows(&self) -> Vec<Option<usize>> {
        (0..self.assets.len())
            .map(|j| self.column(j).position(|v| v.is_finite()))
            .collect()
    }

    /// New panel holding only rows timestamped on or before `date`.
    pub fn truncate_through(&self, date: NaiveDate) -> Self {
        self.slice_rows(0, self.rows_through(date))
    }

    /// The last `len` rows ending at `end_row` (inclusive), bounded by data availability.
    pub fn window_ending_at(&self, end_row: usize, len: usize) -> Self {
        let end = (end_row + 1).min(self.dates.len());
        let start = end.saturating_sub(len);
        self.slice_rows(start, end)
    }

    /// Rows with dates in `[start, end]`.
    pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end);
        self.slice_rows(lo, hi.max(lo))
    }

    /// Restrict to the given assets, in the order given. Unknown identifiers are skipped.
    pub fn select_assets(&self, wanted: &[String]) -> Self {
        let cols: Vec<usize> = wanted
            .iter()
            .filter_map(|a| self.asset_index(a))
            .collect();
        let assets: Vec<String> = cols.iter().map(|&j| self.assets[j].clone()).collect();
        let mut values = Vec::with_capacity(self.dates.len() * cols.len());
        for i in 0..self.dates.len() {
            values.extend(cols.iter().map(|&j| self.get(i, j)));
        }
        Self {
            dates: self.dates.clone(),
            assets,
            values,
        }
    }

    fn slice_rows(&self, start: usize, end: usize) -> Self {
        let n = self.assets.len();
        Self {
            dates: self.dates[start..end].to_vec(),
            assets: self.assets.clone(),
            values: self.values[start * n..end * n].to_vec(),
        }
    }
}

fn validate_axes(dates: &[NaiveDate], assets: &[String]) -> Result<(), PanelError> {
    for pair in dates.windows(2) {
        if pair[1] <= pair[0] {
            return Err(PanelError::UnsortedDates { date: pair[1] });
        }
    }
    let mut seen = HashSet::new();
    for asset in assets {
        if !seen.insert(asset.as_str()) {
            return Err(PanelError::DuplicateAsset(asset.clone()));
        }
    }
    Ok(())
}
