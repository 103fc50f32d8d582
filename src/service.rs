use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::analytics;
use crate::config::AnalyticsPolicy;
use crate::error::AnalyticsError;
use crate::grades::GradeCatalog;
use crate::models::{AnalyticsSummary, HistoryFilters, PredictionRecord};

/// Where prediction history comes from. Implementations return only the
/// given user's records.
#[allow(async_fn_in_trait)]
pub trait RecordSource {
    async fn fetch_records(
        &self,
        user_id: &str,
        filters: &HistoryFilters,
    ) -> Result<Vec<PredictionRecord>, AnalyticsError>;
}

pub async fn compute_analytics<S: RecordSource>(
    source: &S,
    catalog: &GradeCatalog,
    policy: &AnalyticsPolicy,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<AnalyticsSummary, AnalyticsError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(AnalyticsError::MissingUser);
    }

    let records = source
        .fetch_records(user_id, &HistoryFilters::default())
        .await?;
    info!(user_id, records = records.len(), "computing analytics");

    let summary = analytics::summarize(&records, catalog, policy, now);
    debug!(?summary, "analytics computed");
    Ok(summary)
}

/// Narrows a batch of records to a single user. With no `user_id`, the
/// batch must already hold exactly one user.
pub fn scope_to_user(
    records: Vec<PredictionRecord>,
    user_id: Option<&str>,
) -> Result<(String, Vec<PredictionRecord>), AnalyticsError> {
    match user_id.map(str::trim) {
        Some("") => Err(AnalyticsError::MissingUser),
        Some(user_id) => {
            let scoped: Vec<PredictionRecord> = records
                .into_iter()
                .filter(|record| record.user_id.trim() == user_id)
                .collect();
            Ok((user_id.to_string(), scoped))
        }
        None => {
            let mut users: Vec<String> = records
                .iter()
                .map(|record| record.user_id.trim().to_string())
                .collect();
            users.sort_unstable();
            users.dedup();
            match users.as_slice() {
                [only] if !only.is_empty() => Ok((only.clone(), records)),
                [] | [_] => Err(AnalyticsError::MissingUser),
                many => Err(AnalyticsError::AmbiguousUser(many.len())),
            }
        }
    }
}
