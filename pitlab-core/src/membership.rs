//! Membership policy — decides the final asset set for a rebalance from the
//! current holdings and a candidate ranking, under buffer, holding-period and
//! turnover caps.
//!
//! Output is deterministic: every ordering decision breaks rank ties by asset
//! identifier, and the final set is returned sorted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Ordered mapping asset → rank (1 = best).
pub type CandidateRanking = BTreeMap<String, usize>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MembershipError {
    #[error("buffer_rank must be at least 1 (got {0})")]
    InvalidBufferRank(usize),

    #[error("max_turnover must be in [0, 1] (got {0})")]
    InvalidMaxTurnover(f64),

    #[error("min_holding_periods = {0} requires holding-period counters, none given")]
    MissingHoldingPeriods(u32),
}

/// Limits applied when turning a ranking into an asset set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipPolicy {
    pub enabled: bool,
    /// Holdings ranked within this bound are retained even outside `top_k`.
    pub buffer_rank: Option<usize>,
    /// Holdings retained until held for at least this many periods.
    pub min_holding_periods: u32,
    /// Validated and reported, not enforced.
    pub max_turnover: Option<f64>,
    pub max_new_assets: Option<usize>,
    pub max_removed_assets: Option<usize>,
}

impl Default for MembershipPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl MembershipPolicy {
    /// Plain top-k selection.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            buffer_rank: None,
            min_holding_periods: 0,
            max_turnover: None,
            max_new_assets: None,
            max_removed_assets: None,
        }
    }

    pub fn validate(&self) -> Result<(), MembershipError> {
        if let Some(rank) = self.buffer_rank {
            if rank < 1 {
                return Err(MembershipError::InvalidBufferRank(rank));
            }
        }
        if let Some(t) = self.max_turnover {
            if !(0.0..=1.0).contains(&t) {
                return Err(MembershipError::InvalidMaxTurnover(t));
            }
        }
        Ok(())
    }
}

/// Per-asset count of consecutive rebalance periods held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipState {
    holding_periods: BTreeMap<String, u32>,
}

impl MembershipState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding_periods(&self) -> &BTreeMap<String, u32> {
        &self.holding_periods
    }

    pub fn periods_held(&self, asset: &str) -> u32 {
        self.holding_periods.get(asset).copied().unwrap_or(0)
    }

    /// Advance counters after a rebalance: retained assets +1, new assets 1,
    /// assets no longer held are forgotten.
    pub fn record_rebalance<'a>(&mut self, held_after: impl IntoIterator<Item = &'a String>) {
        let next = held_after
            .into_iter()
            .map(|asset| {
                let periods = self.holding_periods.get(asset).map_or(1, |n| n + 1);
                (asset.clone(), periods)
            })
            .collect();
        self.holding_periods = next;
    }
}

/// Sort assets by (rank, identifier).
fn by_rank<'a>(ranks: &CandidateRanking, assets: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut ranked: Vec<(usize, &String)> = assets
        .filter_map(|a| ranks.get(a).map(|&r| (r, a)))
        .collect();
    ranked.sort();
    ranked.into_iter().map(|(_, a)| a.clone()).collect()
}

/// Decide the final asset set for one rebalance.
///
/// `current_holdings` are the assets held going into the rebalance. When the
/// policy requires a minimum holding period, `holding_periods` must be given;
/// assets missing from it count as held for zero periods.
pub fn apply(
    current_holdings: &BTreeSet<String>,
    ranks: &CandidateRanking,
    policy: &MembershipPolicy,
    holding_periods: Option<&BTreeMap<String, u32>>,
    top_k: usize,
) -> Result<Vec<String>, MembershipError> {
    policy.validate()?;

    let top: Vec<String> = by_rank(ranks, ranks.keys())
        .into_iter()
        .take_while(|a| ranks[a] <= top_k)
        .take(top_k)
        .collect();

    if !policy.enabled {
        let mut out = top;
        out.sort();
        return Ok(out);
    }

    if let Some(t) = policy.max_turnover {
        debug!(max_turnover = t, "max_turnover is reported only and not enforced");
    }

    let periods = match (policy.min_holding_periods, holding_periods) {
        (0, p) => p,
        (n, None) => return Err(MembershipError::MissingHoldingPeriods(n)),
        (_, Some(p)) => Some(p),
    };

    let mut keep = BTreeSet::new();
    let mut outside_keep = Vec::new();
    for asset in current_holdings {
        // Absent from the ranking: always dropped, not counted as a removal.
        let Some(&rank) = ranks.get(asset) else {
            continue;
        };
        let in_top = rank <= top_k;
        let in_buffer = policy.buffer_rank.is_some_and(|b| rank <= b);
        let too_young = policy.min_holding_periods > 0
            && periods
                .and_then(|p| p.get(asset))
                .copied()
                .unwrap_or(0)
                < policy.min_holding_periods;
        if in_top || in_buffer || too_young {
            keep.insert(asset.clone());
        } else {
            outside_keep.push(asset.clone());
        }
    }

    // Worst ranks go first; anything past the cap stays.
    let mut removable = by_rank(ranks, outside_keep.iter());
    removable.reverse();
    let removal_cap = policy.max_removed_assets.unwrap_or(usize::MAX);
    for asset in removable.into_iter().skip(removal_cap) {
        keep.insert(asset);
    }

    let new_cap = policy.max_new_assets.unwrap_or(usize::MAX);
    let new_assets = top
        .into_iter()
        .filter(|a| !current_holdings.contains(a))
        .take(new_cap);

    keep.extend(new_assets);
    Ok(keep.into_iter().collect())
}
