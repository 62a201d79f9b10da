//! Calendar test for scheduled rebalances.

use crate::config::RebalanceFrequency;
use chrono::{Datelike, NaiveDate};

/// Whether a scheduled rebalance is due on `today` given the last rebalance date.
///
/// Daily and weekly count elapsed calendar days; monthly, quarterly and
/// annual fire once the corresponding calendar boundary has been crossed.
pub fn is_due(frequency: RebalanceFrequency, last: NaiveDate, today: NaiveDate) -> bool {
    if today <= last {
        return false;
    }
    match frequency {
        RebalanceFrequency::Daily => (today - last).num_days() >= 1,
        RebalanceFrequency::Weekly => (today - last).num_days() >= 7,
        RebalanceFrequency::Monthly => month_index(today) > month_index(last),
        RebalanceFrequency::Quarterly => month_index(today) / 3 > month_index(last) / 3,
        RebalanceFrequency::Annual => today.year() > last.year(),
    }
}

/// Months since year 0, so boundaries compare across years.
fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}
