//! Point-in-time eligibility — which assets have enough history as of a date.
//!
//! Invariant: the mask for date D depends only on rows timestamped on or
//! before D. Rows after D are never read, so mutating them cannot change the
//! result, and the cache key covers exactly the rows that are read.

use crate::data::cache::FactorValueCache;
use crate::data::panel::AssetPanel;
use crate::fingerprint::{date_range_label, CacheKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Cache payload schema version; bump when the mask semantics change.
const MASK_SCHEMA_VERSION: u32 = 1;

/// Malformed eligibility inputs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EligibilityError {
    #[error("return data is empty")]
    EmptyData,

    #[error("date {date} is outside the data range {first}..={last}")]
    DateOutOfRange {
        date: NaiveDate,
        first: NaiveDate,
        last: NaiveDate,
    },

    #[error("{field} must be positive")]
    NonPositiveThreshold { field: &'static str },
}

/// Eligibility per asset, valid for one (data, date, thresholds) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityMask {
    pub date: NaiveDate,
    pub assets: Vec<String>,
    pub eligible: Vec<bool>,
}

impl EligibilityMask {
    /// Eligible assets in panel column order.
    pub fn eligible_assets(&self) -> Vec<String> {
        self.assets
            .iter()
            .zip(&self.eligible)
            .filter(|(_, &ok)| ok)
            .map(|(a, _)| a.clone())
            .collect()
    }

    pub fn is_eligible(&self, asset: &str) -> bool {
        self.assets
            .iter()
            .position(|a| a == asset)
            .is_some_and(|i| self.eligible[i])
    }

    pub fn count(&self) -> usize {
        self.eligible.iter().filter(|&&ok| ok).count()
    }
}

/// Config component of the eligibility cache key.
#[derive(Debug, Clone, Copy, Serialize)]
struct MaskKeyConfig {
    kind: &'static str,
    version: u32,
    min_history_days: u32,
    min_price_rows: u32,
}

/// Compute the eligibility mask for `date`.
///
/// An asset is eligible iff the calendar days elapsed since its first
/// non-missing observation are at least `min_history_days` AND it has at
/// least `min_price_rows` non-missing observations on or before `date`.
pub fn compute_eligibility(
    returns: &AssetPanel,
    date: NaiveDate,
    min_history_days: u32,
    min_price_rows: u32,
) -> Result<EligibilityMask, EligibilityError> {
    validate_inputs(returns, date, min_history_days, min_price_rows)?;

    let visible = returns.rows_through(date);
    let dates = returns.dates();
    let eligible = (0..returns.n_assets())
        .map(|j| {
            let mut first_valid = None;
            let mut observations = 0_u32;
            for i in 0..visible {
                if returns.get(i, j).is_finite() {
                    first_valid.get_or_insert(i);
                    observations += 1;
                }
            }
            match first_valid {
                Some(first) => {
                    let elapsed = (date - dates[first]).num_days();
                    elapsed >= i64::from(min_history_days) && observations >= min_price_rows
                }
                None => false,
            }
        })
        .collect();

    Ok(EligibilityMask {
        date,
        assets: returns.assets().to_vec(),
        eligible,
    })
}

fn validate_inputs(
    returns: &AssetPanel,
    date: NaiveDate,
    min_history_days: u32,
    min_price_rows: u32,
) -> Result<(), EligibilityError> {
    let (Some(first), Some(last)) = (returns.first_date(), returns.last_date()) else {
        return Err(EligibilityError::EmptyData);
    };
    if returns.n_assets() == 0 {
        return Err(EligibilityError::EmptyData);
    }
    if date < first || date > last {
        return Err(EligibilityError::DateOutOfRange { date, first, last });
    }
    if min_history_days == 0 {
        return Err(EligibilityError::NonPositiveThreshold {
            field: "min_history_days",
        });
    }
    if min_price_rows == 0 {
        return Err(EligibilityError::NonPositiveThreshold {
            field: "min_price_rows",
        });
    }
    Ok(())
}

/// Eligibility filter, optionally backed by a [`FactorValueCache`].
///
/// Cache hits and misses never change the result, only latency.
#[derive(Debug, Clone, Default)]
pub struct EligibilityFilter {
    cache: Option<Arc<FactorValueCache>>,
}

impl EligibilityFilter {
    pub fn uncached() -> Self {
        Self { cache: None }
    }

    pub fn cached(cache: Arc<FactorValueCache>) -> Self {
        Self { cache: Some(cache) }
    }

    pub fn cache(&self) -> Option<&Arc<FactorValueCache>> {
        self.cache.as_ref()
    }

    pub fn compute(
        &self,
        returns: &AssetPanel,
        date: NaiveDate,
        min_history_days: u32,
        min_price_rows: u32,
    ) -> Result<EligibilityMask, EligibilityError> {
        let Some(cache) = &self.cache else {
            return compute_eligibility(returns, date, min_history_days, min_price_rows);
        };
        validate_inputs(returns, date, min_history_days, min_price_rows)?;

        // Key on the visible rows only: later rows cannot affect the mask.
        let visible = returns.truncate_through(date);
        let key_config = MaskKeyConfig {
            kind: "pit_eligibility",
            version: MASK_SCHEMA_VERSION,
            min_history_days,
            min_price_rows,
        };
        let range = match visible.first_date() {
            Some(first) => date_range_label(first, date),
            None => return Err(EligibilityError::EmptyData),
        };
        let key = match CacheKey::for_inputs(&visible, &key_config, range) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "eligibility cache key unavailable; computing directly");
                return compute_eligibility(returns, date, min_history_days, min_price_rows);
            }
        };

        if let Some(mask) = cache.get::<EligibilityMask>(&key) {
            if mask.date == date && mask.assets.as_slice() == returns.assets() {
                return Ok(mask);
            }
        }
        // `date` need not be a row of `visible`; the full panel carries the range check.
        let mask = compute_eligibility(returns, date, min_history_days, min_price_rows)?;
        cache.put(&key, &mask);
        Ok(mask)
    }
}
