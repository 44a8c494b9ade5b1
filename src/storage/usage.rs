use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::db::{next_id, Database, DatabaseError};
use super::models::ApiUsage;
use super::tables::API_USAGE;

/// Narrowing applied to a user's usage log. `from` is inclusive, `until` exclusive.
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub project_id: Option<u64>,
    pub api_key_id: Option<u64>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl UsageFilter {
    fn matches(&self, usage: &ApiUsage) -> bool {
        self.project_id.map_or(true, |p| usage.project_id == p)
            && self.api_key_id.map_or(true, |k| usage.api_key_id == k)
            && self.from.map_or(true, |from| usage.timestamp >= from)
            && self.until.map_or(true, |until| usage.timestamp < until)
    }
}

/// Calls aggregated over one UTC day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUsage {
    pub date: String,
    pub api_calls: u64,
    pub avg_response_time: f64,
    pub success_rate: f64,
}

/// A usage entry before it has been assigned an id
#[derive(Debug, Clone)]
pub struct NewUsage<'a> {
    pub endpoint: &'a str,
    pub response_time_ms: f64,
    pub status_code: u16,
    pub owner_id: &'a str,
    pub project_id: u64,
    pub api_key_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl Database {
    // ========================================================================
    // API usage operations
    // ========================================================================

    pub fn record_usage(&self, usage: NewUsage<'_>) -> Result<ApiUsage, DatabaseError> {
        let write_txn = self.begin_write()?;
        let record = {
            let id = next_id(&write_txn, "api_usage")?;
            let record = ApiUsage {
                id,
                timestamp: usage.timestamp,
                endpoint: usage.endpoint.to_string(),
                response_time_ms: usage.response_time_ms,
                status_code: usage.status_code,
                owner_id: usage.owner_id.to_string(),
                project_id: usage.project_id,
                api_key_id: usage.api_key_id,
            };
            let mut table = write_txn.open_table(API_USAGE)?;
            let data = rmp_serde::to_vec_named(&record)?;
            table.insert((usage.owner_id, id), data.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Usage entries of one owner matching `filter`, oldest first
    pub fn usage_records(
        &self,
        owner_id: &str,
        filter: &UsageFilter,
    ) -> Result<Vec<ApiUsage>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(API_USAGE)?;

        let mut records = Vec::new();
        for result in table.range((owner_id, 0u64)..=(owner_id, u64::MAX))? {
            let (_, value) = result?;
            let usage: ApiUsage = rmp_serde::from_slice(value.value())?;
            if filter.matches(&usage) {
                records.push(usage);
            }
        }
        Ok(records)
    }

    pub fn count_usage(&self, owner_id: &str, filter: &UsageFilter) -> Result<u64, DatabaseError> {
        Ok(self.usage_records(owner_id, filter)?.len() as u64)
    }

    /// Newest entries first, at most `limit` of them
    pub fn usage_details(
        &self,
        owner_id: &str,
        filter: &UsageFilter,
        limit: usize,
    ) -> Result<Vec<ApiUsage>, DatabaseError> {
        let mut records = self.usage_records(owner_id, filter)?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    /// Per-day call counts, mean latency and share of responses below 400
    pub fn daily_usage(
        &self,
        owner_id: &str,
        filter: &UsageFilter,
    ) -> Result<Vec<DailyUsage>, DatabaseError> {
        #[derive(Default)]
        struct Day {
            calls: u64,
            total_ms: f64,
            ok: u64,
        }

        let mut days: BTreeMap<NaiveDate, Day> = BTreeMap::new();
        for usage in self.usage_records(owner_id, filter)? {
            let day = days.entry(usage.timestamp.date_naive()).or_default();
            day.calls += 1;
            day.total_ms += usage.response_time_ms;
            if usage.status_code < 400 {
                day.ok += 1;
            }
        }

        Ok(days
            .into_iter()
            .map(|(date, day)| DailyUsage {
                date: date.format("%Y-%m-%d").to_string(),
                api_calls: day.calls,
                avg_response_time: day.total_ms / day.calls as f64,
                success_rate: day.ok as f64 * 100.0 / day.calls as f64,
            })
            .collect())
    }
}
