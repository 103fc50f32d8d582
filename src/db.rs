use std::io::Read;

use anyhow::Context;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AnalyticsError;
use crate::models::{
    parse_processed_at, strip_percent, HistoryFilters, HistoryRecord, NewPrediction,
    PredictionRecord,
};
use crate::service::RecordSource;

pub const SEED_USER: &str = "demo-grower";

// Confidence is stored as text; only numeric text takes part in range filters.
// A single trailing `%` is accepted, matching how analytics read the value.
const NUMERIC_CONFIDENCE: &str = r"(CASE WHEN trim(confidence) ~ '^[-+]?[0-9]*\.?[0-9]+\s*%?$' THEN rtrim(rtrim(trim(confidence), '%'))::double precision END)";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let now = Utc::now();
    let predictions = vec![
        ("seed-001", "ChengShu", "91.2", 3),
        ("seed-002", "JiaShu", "84", 9),
        ("seed-003", "ChengShu", "88.5", 17),
        ("seed-004", "QianShu", "67", 26),
        ("seed-005", "JiaShu", "79.4", 38),
        ("seed-006", "ShangShu", "72", 47),
        ("seed-007", "ChengShu", "93", 75),
        ("seed-008", "QianShu", "58.9", 104),
        ("seed-009", "JiaShu", "81", 133),
    ];

    let mut inserted = 0usize;
    for (source_key, grade, confidence, days_ago) in predictions {
        let prediction = NewPrediction {
            user_id: SEED_USER.to_string(),
            grade: grade.to_string(),
            confidence: confidence.to_string(),
            image_url: format!("leaf-images/{SEED_USER}/{source_key}.jpg"),
            processed_at: now - Duration::days(days_ago),
            source_key: Some(source_key.to_string()),
        };

        if insert_prediction(pool, &prediction).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

/// Saves one prediction result to upload history. Returns `false` when a
/// row with the same source key already exists.
pub async fn insert_prediction(pool: &PgPool, prediction: &NewPrediction) -> anyhow::Result<bool> {
    if prediction.user_id.trim().is_empty() {
        return Err(AnalyticsError::MissingUser.into());
    }
    if prediction.grade.trim().is_empty() {
        return Err(AnalyticsError::InvalidRecord("grade is empty".to_string()).into());
    }

    let result = sqlx::query(
        r#"
        INSERT INTO leaf_grading.upload_history
        (id, user_id, result, image_url, confidence, processed_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(prediction.user_id.trim())
    .bind(prediction.grade.trim())
    .bind(&prediction.image_url)
    .bind(strip_percent(&prediction.confidence))
    .bind(prediction.processed_at)
    .bind(prediction.source_key.as_deref())
    .execute(pool)
    .await
    .context("failed to save prediction to history")?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_records(
    pool: &PgPool,
    user_id: &str,
    filters: &HistoryFilters,
) -> Result<Vec<HistoryRecord>, sqlx::Error> {
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, user_id, result, image_url, confidence, processed_at \
         FROM leaf_grading.upload_history \
         WHERE user_id = ",
    );
    query.push_bind(user_id);

    if let Some(from) = filters.from {
        query.push(" AND processed_at >= ").push_bind(from);
    }
    if let Some(to) = filters.to {
        query.push(" AND processed_at < ").push_bind(to);
    }
    if let Some(grade) = filters.grade.as_deref() {
        query.push(" AND result = ").push_bind(grade.to_string());
    }
    if let Some(min) = filters.min_confidence {
        query
            .push(" AND ")
            .push(NUMERIC_CONFIDENCE)
            .push(" >= ")
            .push_bind(min);
    }
    if let Some(max) = filters.max_confidence {
        query
            .push(" AND ")
            .push(NUMERIC_CONFIDENCE)
            .push(" <= ")
            .push_bind(max);
    }

    query.push(" ORDER BY processed_at DESC");
    if let Some(limit) = filters.limit {
        query.push(" LIMIT ").push_bind(limit.max(1));
    }

    let rows = query.build().fetch_all(pool).await?;
    let mut records = Vec::with_capacity(rows.len());

    for row in rows {
        records.push(HistoryRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            grade: row.try_get("result")?,
            image_url: row.try_get("image_url")?,
            confidence: row.try_get("confidence")?,
            processed_at: row.try_get("processed_at")?,
        });
    }

    debug!(user_id, count = records.len(), "fetched upload history");
    Ok(records)
}

impl RecordSource for PgPool {
    async fn fetch_records(
        &self,
        user_id: &str,
        filters: &HistoryFilters,
    ) -> Result<Vec<PredictionRecord>, AnalyticsError> {
        let rows = fetch_records(self, user_id, filters).await?;
        Ok(rows.iter().map(PredictionRecord::from).collect())
    }
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    user_id: String,
    result: String,
    #[serde(default)]
    image_url: String,
    confidence: String,
    processed_at: String,
    #[serde(default)]
    source_key: Option<String>,
}

/// Reads upload history rows from CSV. Rows without a user or with an
/// unreadable timestamp are skipped.
pub fn read_csv_rows<R: Read>(reader: R) -> anyhow::Result<Vec<NewPrediction>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut predictions = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV row {}", line + 1))?;

        if row.user_id.trim().is_empty() {
            warn!(row = line + 1, "skipping row without a user id");
            continue;
        }

        let Some(processed_at) = parse_processed_at(&row.processed_at) else {
            warn!(
                row = line + 1,
                processed_at = %row.processed_at,
                "skipping row with unreadable timestamp"
            );
            continue;
        };

        let source_key = row
            .source_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        predictions.push(NewPrediction {
            user_id: row.user_id,
            grade: row.result,
            confidence: row.confidence,
            image_url: row.image_url,
            processed_at: processed_at.with_timezone(&Utc),
            source_key: Some(source_key),
        });
    }

    Ok(predictions)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let predictions = read_csv_rows(file)?;
    let mut inserted = 0usize;

    for prediction in predictions.iter() {
        if insert_prediction(pool, prediction).await? {
            inserted += 1;
        }
    }

    info!(
        path = %csv_path.display(),
        read = predictions.len(),
        inserted,
        "imported upload history"
    );
    Ok(inserted)
}
