//! Status text for a refresh report

use chrono::{DateTime, Local};

use crate::refresh::StatusReport;
use crate::types::IndicatorRecord;

/// Title shown for a failed refresh
pub const ERROR_TITLE: &str = "🔴 Error";

/// Glyph and label, e.g. "🧯 Mitigate"
pub fn title(report: &StatusReport) -> String {
    match &report.result {
        Ok(agg) => format!("{} {}", agg.label.glyph(), agg.label),
        Err(_) => ERROR_TITLE.to_string(),
    }
}

/// One-line hold/sell summary, or the failure message
pub fn summary(report: &StatusReport) -> String {
    match &report.result {
        Ok(agg) => format!(
            "Hold:{:.1}% | Sell:{:.1}% | Signal:{}",
            agg.hold_pct, agg.sell_pct, agg.label
        ),
        Err(e) => format!("Update Failed: {}", e),
    }
}

pub fn last_updated(report: &StatusReport) -> String {
    format!("Last Updated: {}", report.updated_at.format("%Y-%m-%d %H:%M:%S"))
}

/// Format one triggered indicator, with its local trigger time when known.
/// A zero timestamp means upstream has no time for the hit.
pub fn format_indicator(record: &IndicatorRecord) -> String {
    match record.hit_time.filter(|&ms| ms != 0) {
        Some(ms) => match DateTime::from_timestamp_millis(ms) {
            Some(at) => format!(
                "✔ {} @ {}",
                record.name,
                at.with_timezone(&Local).format("%b %d %H:%M")
            ),
            None => format!("✔ {} (Invalid Time)", record.name),
        },
        None => format!("✔ {}", record.name),
    }
}

/// Lines listing the triggered indicators
pub fn triggered_lines(report: &StatusReport) -> Vec<String> {
    match &report.result {
        Ok(agg) if !agg.triggered.is_empty() => {
            agg.triggered.iter().map(format_indicator).collect()
        }
        Ok(_) => vec!["✔ None Triggered".to_string()],
        Err(_) => Vec::new(),
    }
}

/// Full multi-line rendering of a report
pub fn render(report: &StatusReport) -> String {
    let mut lines = vec![title(report), last_updated(report), summary(report)];
    lines.extend(triggered_lines(report));
    lines.join("\n")
}
