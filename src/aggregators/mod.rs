// Hit-ratio aggregation
use crate::types::*;

/// Round to 2 decimal places
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate an indicator set into a hold/sell split.
///
/// `sell_pct` is the share of triggered records (0.0 for an empty set) and
/// `hold_pct` its complement; the label is taken from the unrounded sell
/// percentage.
pub fn aggregate_indicators(records: Vec<IndicatorRecord>) -> Aggregate {
    let total = records.len();
    let triggered: Vec<IndicatorRecord> = records.into_iter().filter(|r| r.hit).collect();

    let sell_pct = if total > 0 {
        triggered.len() as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let hold_pct = 100.0 - sell_pct;

    Aggregate {
        hold_pct: round2(hold_pct),
        sell_pct: round2(sell_pct),
        label: SentimentLabel::classify(sell_pct),
        triggered,
        total,
    }
}
