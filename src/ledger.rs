use crate::models::{EVENING_FIELD, MORNING_FIELD};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static VOLUME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(\.\d*)?|\.\d+)$").expect("valid volume regex"));

/// Non-negative decimal litres, as typed into a number field.
pub fn is_valid_volume(raw: &str) -> bool {
    VOLUME_PATTERN.is_match(raw.trim())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyEntry {
    pub day_key: String,
    pub day: u32,
    pub morning: Option<String>,
    pub evening: Option<String>,
}

impl DailyEntry {
    pub fn total_litres(&self) -> f64 {
        litres(self.morning.as_deref()) + litres(self.evening.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyLedger {
    pub month_name: String,
    /// Newest day first.
    pub entries: Vec<DailyEntry>,
    pub total_litres: f64,
}

impl MonthlyLedger {
    pub fn empty(month_name: &str) -> Self {
        Self {
            month_name: month_name.to_string(),
            ..Self::default()
        }
    }

    /// Rebuilds the ledger from a month snapshot (`{ day: { Morning, Evening } }`).
    pub fn from_snapshot(month_name: &str, snapshot: Option<&Value>) -> Self {
        let mut entries = snapshot
            .and_then(Value::as_object)
            .map(|days| {
                days.iter()
                    .filter_map(|(day_key, record)| daily_entry(day_key, record))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| b.day.cmp(&a.day).then_with(|| b.day_key.cmp(&a.day_key)));

        let total_litres = round_litres(entries.iter().map(DailyEntry::total_litres).sum());
        Self {
            month_name: month_name.to_string(),
            entries,
            total_litres,
        }
    }
}

fn daily_entry(day_key: &str, record: &Value) -> Option<DailyEntry> {
    let Ok(day) = day_key.trim().parse::<u32>() else {
        tracing::warn!(day_key, "skipping record with a non-numeric day key");
        return None;
    };
    let fields = record.as_object()?;
    Some(DailyEntry {
        day_key: day_key.to_string(),
        day,
        morning: fields.get(MORNING_FIELD).and_then(volume_text),
        evening: fields.get(EVENING_FIELD).and_then(volume_text),
    })
}

/// Stored volumes are strings, but a number written by another client is read too.
fn volume_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn litres(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            tracing::warn!(raw, "unreadable volume counted as zero");
            0.0
        }
    }
}

fn round_litres(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// `12`, `12.5`; never more than three decimals.
pub fn format_litres(value: f64) -> String {
    format!("{}", round_litres(value))
}
