use anyhow::Context;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Confidence as it arrives from exports and the store: a number, a numeric
/// string, or something else entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawConfidence {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl RawConfidence {
    /// Normalizes to a percentage. Anything that is not a finite number is 0.
    pub fn value(&self) -> f64 {
        let parsed = match self {
            RawConfidence::Number(value) => *value,
            RawConfidence::Text(text) => strip_percent(text).parse::<f64>().unwrap_or(0.0),
            RawConfidence::Other(_) => 0.0,
        };

        if parsed.is_finite() {
            parsed
        } else {
            0.0
        }
    }
}

/// Trims the value and drops one trailing `%`.
pub fn strip_percent(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end()
}

/// A prediction record in the shape of a JSON export. Every field is
/// optional and loosely typed; [`PredictionRecord::from`] decides what a
/// bad value means.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPredictionRecord {
    #[serde(alias = "user_id", default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(alias = "result", default)]
    pub grade: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<RawConfidence>,
    #[serde(alias = "processed_at", default)]
    pub processed_at: Option<serde_json::Value>,
}

/// A prediction record after the boundary parse. This is what the
/// aggregator consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub user_id: String,
    pub grade: String,
    pub confidence: f64,
    pub processed_at: Option<DateTime<FixedOffset>>,
}

impl From<RawPredictionRecord> for PredictionRecord {
    fn from(raw: RawPredictionRecord) -> Self {
        PredictionRecord {
            user_id: identifier(raw.user_id.as_ref()),
            grade: match raw.grade {
                Some(serde_json::Value::String(grade)) => grade,
                _ => String::new(),
            },
            confidence: raw.confidence.as_ref().map(RawConfidence::value).unwrap_or(0.0),
            processed_at: match raw.processed_at {
                Some(serde_json::Value::String(text)) => parse_processed_at(&text),
                _ => None,
            },
        }
    }
}

// User ids are opaque; numeric ids from the store are kept as their text.
fn identifier(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(id)) => id.trim().to_string(),
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => String::new(),
    }
}

/// Parses a JSON export: an array of records. Entries that are not objects
/// are skipped rather than failing the whole export.
pub fn parse_export(content: &str) -> anyhow::Result<Vec<PredictionRecord>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(content).context("export is not a JSON array")?;
    let mut records = Vec::with_capacity(entries.len());

    for (idx, entry) in entries.into_iter().enumerate() {
        if !entry.is_object() {
            warn!(entry = idx, "skipping export entry that is not an object");
            continue;
        }
        match serde_json::from_value::<RawPredictionRecord>(entry) {
            Ok(raw) => records.push(PredictionRecord::from(raw)),
            Err(err) => warn!(entry = idx, %err, "skipping unreadable export entry"),
        }
    }

    Ok(records)
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const OFFSET_FORMATS: [&str; 8] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M%z",
    "%Y-%m-%d %H:%M%:z",
];

/// Parses the timestamp forms seen in upload history. Offsetless values are
/// read as UTC.
pub fn parse_processed_at(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed);
    }

    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }

    let naive = value
        .strip_suffix('Z')
        .or_else(|| value.strip_suffix('z'))
        .unwrap_or(value);
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(parsed.and_utc().fixed_offset());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// A row of upload history as stored.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub user_id: String,
    pub grade: String,
    pub image_url: String,
    pub confidence: String,
    pub processed_at: DateTime<Utc>,
}

impl From<&HistoryRecord> for PredictionRecord {
    fn from(row: &HistoryRecord) -> Self {
        PredictionRecord {
            user_id: row.user_id.clone(),
            grade: row.grade.clone(),
            confidence: RawConfidence::Text(row.confidence.clone()).value(),
            processed_at: Some(row.processed_at.fixed_offset()),
        }
    }
}

/// A prediction result to be saved to history.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub user_id: String,
    pub grade: String,
    pub confidence: String,
    pub image_url: String,
    pub processed_at: DateTime<Utc>,
    pub source_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilters {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub grade: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeShare {
    pub grade: String,
    pub count: usize,
    pub percentage: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeConfidence {
    pub grade: String,
    pub confidence: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTrend {
    pub month: String,
    pub prediction_count: usize,
    pub average_confidence: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_predictions: usize,
    pub average_confidence: i64,
    pub most_common_grade: String,
    pub grade_distribution: Vec<GradeShare>,
    pub confidence_by_grade: Vec<GradeConfidence>,
    pub quality_trends: Vec<MonthlyTrend>,
    pub trends_change_percent: i64,
    pub confidence_change_percent: i64,
}
