//! Table and text formatting for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Plain table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// First 12 hex chars of an identity, with any `sha256:` prefix dropped.
pub fn short_id(id: &str) -> &str {
    let hex = id.strip_prefix("sha256:").unwrap_or(id);
    hex.get(..12).unwrap_or(hex)
}

/// Relative age of a timestamp, e.g. "3 hours ago".
pub fn format_ago(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let duration = chrono::Utc::now().signed_duration_since(*dt);
    let secs = duration.num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    let (value, unit) = match secs {
        0..=59 => (secs, "second"),
        60..=3_599 => (duration.num_minutes(), "minute"),
        3_600..=86_399 => (duration.num_hours(), "hour"),
        _ => match duration.num_days() {
            days @ 0..=29 => (days, "day"),
            days @ 30..=364 => (days / 30, "month"),
            days => (days / 365, "year"),
        },
    };
    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}
