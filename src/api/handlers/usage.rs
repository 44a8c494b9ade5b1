use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::auth::Whitelisted;
use crate::storage::models::ApiUsage;
use crate::storage::{DailyUsage, UsageFilter};
use crate::AppState;

const DASHBOARD_WINDOW_DAYS: i64 = 30;
const DEFAULT_DETAILS_LIMIT: usize = 100;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_storage: u64,
    pub total_storage_limit: u64,
    pub total_files: u64,
    pub total_api_requests: u64,
    /// Percent change against the preceding window
    pub api_requests_change: f64,
}

#[derive(Debug, Serialize)]
pub struct StorageStats {
    /// Bytes recorded in file metadata, deduplicated files counted in full
    pub database_storage: u64,
    /// Bytes actually held by the object store under the caller's projects
    pub object_storage: u64,
    pub object_count: u64,
    pub storage_limit: u64,
}

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub api_key_id: Option<u64>,
    /// `YYYY-MM-DD`, inclusive
    #[serde(default)]
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`, inclusive of the whole day
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl UsageParams {
    fn filter(&self) -> Result<UsageFilter, ApiError> {
        let from = match self.start_date.as_deref() {
            Some(s) => Some(day_start(parse_date(s, "start_date")?)),
            None => None,
        };
        let until = match self.end_date.as_deref() {
            Some(s) => {
                let next_day = parse_date(s, "end_date")?
                    .succ_opt()
                    .ok_or_else(|| ApiError::bad_request("invalid end_date"))?;
                Some(day_start(next_day))
            }
            None => None,
        };

        Ok(UsageFilter {
            project_id: self.project_id,
            api_key_id: self.api_key_id,
            from,
            until,
        })
    }
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("invalid {field}")))
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Percent change from `previous` to `current`. Growth from nothing counts as 100%.
fn percent_change(current: u64, previous: u64) -> f64 {
    if previous > 0 {
        (current as f64 - previous as f64) / previous as f64 * 100.0
    } else if current > 0 {
        100.0
    } else {
        0.0
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
) -> Result<Json<JSend<DashboardStats>>, ApiError> {
    let totals = state.db.owner_storage_totals(&identity.uid)?;

    let now = Utc::now();
    let window_start = now - Duration::days(DASHBOARD_WINDOW_DAYS);
    let previous_start = window_start - Duration::days(DASHBOARD_WINDOW_DAYS);

    let current = state.db.count_usage(
        &identity.uid,
        &UsageFilter {
            from: Some(window_start),
            ..Default::default()
        },
    )?;
    let previous = state.db.count_usage(
        &identity.uid,
        &UsageFilter {
            from: Some(previous_start),
            until: Some(window_start),
            ..Default::default()
        },
    )?;

    Ok(JSend::success(DashboardStats {
        total_storage: totals.total_storage,
        total_storage_limit: state.config.storage_limit,
        total_files: totals.total_files,
        total_api_requests: current,
        api_requests_change: percent_change(current, previous),
    }))
}

/// Metadata totals next to what the object store holds under the caller's
/// project prefixes. Deduplicated records count in the former only.
pub async fn storage_stats(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
) -> Result<Json<JSend<StorageStats>>, ApiError> {
    let totals = state.db.owner_storage_totals(&identity.uid)?;

    let mut object_storage = 0;
    let mut object_count = 0;
    for project in state.db.list_projects(&identity.uid)? {
        let prefix = state.project_key_prefix(project.id);
        let listing = tokio::time::timeout(
            state.config.request_timeout,
            state.object_store.list(&prefix),
        )
        .await;

        match listing {
            Ok(Ok(objects)) => {
                object_count += objects.len() as u64;
                object_storage += objects.iter().map(|o| o.size).sum::<u64>();
            }
            Ok(Err(e)) => {
                tracing::warn!(prefix = %prefix, error = %e, "Failed to list objects for storage stats");
            }
            Err(_) => {
                tracing::warn!(prefix = %prefix, "Timed out listing objects for storage stats");
            }
        }
    }

    Ok(JSend::success(StorageStats {
        database_storage: totals.total_storage,
        object_storage,
        object_count,
        storage_limit: state.config.storage_limit,
    }))
}

/// Per-day aggregation, oldest day first.
pub async fn usage_stats(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    AppQuery(params): AppQuery<UsageParams>,
) -> Result<Json<JSend<Vec<DailyUsage>>>, ApiError> {
    let filter = params.filter()?;
    let days = state.db.daily_usage(&identity.uid, &filter)?;
    Ok(JSend::success(days))
}

pub async fn usage_details(
    State(state): State<Arc<AppState>>,
    Whitelisted(identity): Whitelisted,
    AppQuery(params): AppQuery<UsageParams>,
) -> Result<Json<JSend<Vec<ApiUsage>>>, ApiError> {
    let filter = params.filter()?;
    let limit = params
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_DETAILS_LIMIT);

    let records = state.db.usage_details(&identity.uid, &filter, limit)?;
    Ok(JSend::success(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_against_previous_window() {
        assert_eq!(percent_change(15, 10), 50.0);
        assert_eq!(percent_change(5, 10), -50.0);
        assert_eq!(percent_change(3, 0), 100.0);
        assert_eq!(percent_change(0, 0), 0.0);
    }

    #[test]
    fn end_date_covers_whole_day() {
        let params = UsageParams {
            project_id: None,
            api_key_id: None,
            start_date: Some("2024-05-01".into()),
            end_date: Some("2024-05-01".into()),
            limit: None,
        };
        let filter = params.filter().unwrap();
        let from = filter.from.unwrap();
        let until = filter.until.unwrap();
        assert_eq!(until - from, Duration::days(1));
        assert_eq!(from.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_malformed_dates() {
        let params = UsageParams {
            project_id: None,
            api_key_id: None,
            start_date: Some("05/01/2024".into()),
            end_date: None,
            limit: None,
        };
        let err = params.filter().unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn last_representable_end_date_is_rejected() {
        let params = UsageParams {
            project_id: None,
            api_key_id: None,
            start_date: None,
            end_date: Some("+262142-12-31".into()),
            limit: None,
        };
        let err = params.filter().unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
