//! Short-horizon features derived from the current and lagged OHLC rows.
//!
//! Every formula is total: a zero or undefined denominator yields `0.0` so one bad
//! cell degrades a single feature instead of aborting the cycle.

use crate::misc::FeatureVector;
use data_ingestion::parser::PriceSnapshot;

/// Percentage change from `previous` to `current`, `0.0` when undefined.
pub fn percentage_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 || previous.is_nan() {
        return 0.0;
    }
    let change = ((current - previous) / previous) * 100.0;
    if change.is_finite() { change } else { 0.0 }
}

/// `high - low`, `0.0` when the difference overflows.
pub fn price_range(high: f64, low: f64) -> f64 {
    let range = high - low;
    if range.is_finite() { range } else { 0.0 }
}

pub fn relative_volatility(range: f64, open: f64) -> f64 {
    if open == 0.0 || open.is_nan() {
        return 0.0;
    }
    let volatility = range / open;
    if volatility.is_finite() { volatility } else { 0.0 }
}

/// Mean of the two lagged changes. Both inputs are already zero-guarded.
pub fn avg_lagged_change(change_lag1: f64, change_lag2: f64) -> f64 {
    (change_lag1 + change_lag2) / 2.0
}

/// Extract features from the rows of one scrape
pub fn extract_features(snapshot: &PriceSnapshot) -> FeatureVector {
    let PriceSnapshot {
        current,
        lag1,
        lag2,
        lag3,
    } = snapshot;

    let change = percentage_change(current.close, lag1.close);
    let change_lag1 = percentage_change(lag1.close, lag2.close);
    let change_lag2 = percentage_change(lag2.close, lag3.close);

    let range = price_range(current.high, current.low);

    FeatureVector {
        open: current.open,
        change,
        change_lag1,
        change_lag2,
        price_range: range,
        relative_volatility: relative_volatility(range, current.open),
        avg_lagged_change: avg_lagged_change(change_lag1, change_lag2),
    }
}
