use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Local};
use serde::Serialize;

use super::error::{StoreError, StoreResult};
use super::pricing::{CostBreakdown, PricingLookup, UsageSnapshot};
use super::store::{
    format_local, parse_created_at, prefilter_key, start_of_day, start_of_hour, RequestLogStore,
    UsageRow,
};
use crate::constants::UNKNOWN_PROVIDER_LABEL;

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;
const DEFAULT_HEATMAP_DAYS: i64 = 30;
const MAX_HEATMAP_DAYS: i64 = 3660;
const SERIES_HOURS: usize = 24;

#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub id: i64,
    pub platform: String,
    pub model: String,
    pub provider: String,
    pub http_code: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub is_stream: bool,
    pub duration_sec: f64,
    pub created_at: String,
    #[serde(flatten)]
    pub cost: CostBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeatmapBucket {
    /// `MM-DD HH` in local time.
    pub day: String,
    /// `YYYY-MM-DD HH:00:00` in local time.
    pub bucket: String,
    pub total_requests: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub reasoning_tokens: i64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogStatsSeries {
    pub day: String,
    pub total_requests: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub reasoning_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogStats {
    pub total_requests: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub reasoning_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub cost_total: f64,
    pub cost_input: f64,
    pub cost_output: f64,
    pub cost_cache_create: f64,
    pub cost_cache_read: f64,
    pub series: Vec<LogStatsSeries>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderDailyStat {
    pub provider: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub success_rate: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub reasoning_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub cost_total: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TokenSums {
    requests: i64,
    successful: i64,
    input: i64,
    output: i64,
    reasoning: i64,
    cache_create: i64,
    cache_read: i64,
}

impl TokenSums {
    fn add(&mut self, row: &UsageRow) {
        self.requests += 1;
        if (200..300).contains(&row.http_code) {
            self.successful += 1;
        }
        self.input += row.input_tokens;
        self.output += row.output_tokens;
        self.reasoning += row.reasoning_tokens;
        self.cache_create += row.cache_create_tokens;
        self.cache_read += row.cache_read_tokens;
    }

    fn usage(&self) -> UsageSnapshot {
        UsageSnapshot::from_counts(self.input, self.output, self.cache_create, self.cache_read)
    }
}

/// Groups rows by `(key, model)`; rows for which `key_of` returns `None` are dropped.
fn group_by_model<K, F>(rows: &[UsageRow], mut key_of: F) -> BTreeMap<(K, String), TokenSums>
where
    K: Ord,
    F: FnMut(&UsageRow) -> Option<K>,
{
    let mut groups: BTreeMap<(K, String), TokenSums> = BTreeMap::new();
    for row in rows {
        let Some(key) = key_of(row) else {
            continue;
        };
        groups
            .entry((key, row.model.clone()))
            .or_default()
            .add(row);
    }
    groups
}

fn empty_if_missing<T: Default>(res: StoreResult<T>) -> StoreResult<T> {
    match res {
        Err(StoreError::MissingTable) => Ok(T::default()),
        other => other,
    }
}

/// Read-only reporting over the request log, with cost decoration.
pub struct LogService {
    store: Arc<RequestLogStore>,
    pricing: Arc<dyn PricingLookup>,
}

impl LogService {
    pub fn new(store: Arc<RequestLogStore>, pricing: Arc<dyn PricingLookup>) -> Self {
        Self { store, pricing }
    }

    fn cost_of(&self, model: &str, sums: &TokenSums) -> CostBreakdown {
        self.pricing.cost_of(model, &sums.usage())
    }

    /// Newest-first rows. `limit <= 0` means 100; values above 1000 are capped.
    pub fn list_request_logs(
        &self,
        platform: &str,
        provider: &str,
        limit: i64,
    ) -> StoreResult<Vec<RequestLog>> {
        let limit = if limit <= 0 {
            DEFAULT_LOG_LIMIT
        } else {
            limit.min(MAX_LOG_LIMIT)
        };
        let rows = empty_if_missing(self.store.list_recent(platform, provider, limit as usize))?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let usage = UsageSnapshot::from_counts(
                    row.input_tokens,
                    row.output_tokens,
                    row.cache_create_tokens,
                    row.cache_read_tokens,
                );
                let cost = self.pricing.cost_of(&row.model, &usage);
                RequestLog {
                    id: row.id,
                    platform: row.platform,
                    model: row.model,
                    provider: row.provider,
                    http_code: row.http_code,
                    input_tokens: row.input_tokens,
                    output_tokens: row.output_tokens,
                    cache_create_tokens: row.cache_create_tokens,
                    cache_read_tokens: row.cache_read_tokens,
                    reasoning_tokens: row.reasoning_tokens,
                    is_stream: row.is_stream,
                    duration_sec: row.duration_sec,
                    created_at: row.created_at,
                    cost,
                }
            })
            .collect())
    }

    pub fn list_providers(&self, platform: &str) -> StoreResult<Vec<String>> {
        empty_if_missing(self.store.distinct_providers(platform))
    }

    pub fn heatmap_stats(&self, days: i64) -> StoreResult<Vec<HeatmapBucket>> {
        self.heatmap_stats_at(days, Local::now())
    }

    /// Sparse hourly buckets for the `days * 24` hours ending with the hour of `now`,
    /// newest first. Hours without rows are absent. `days` is capped at ten years.
    pub fn heatmap_stats_at(
        &self,
        days: i64,
        now: DateTime<Local>,
    ) -> StoreResult<Vec<HeatmapBucket>> {
        let days = if days <= 0 {
            DEFAULT_HEATMAP_DAYS
        } else {
            days.min(MAX_HEATMAP_DAYS)
        };
        let total_hours = (days * 24) as usize;
        let current_hour = start_of_hour(&now);
        let window_start = current_hour - Duration::hours(total_hours as i64 - 1);
        let window_end = current_hour + Duration::hours(1);

        let rows = empty_if_missing(self.store.usage_rows_since(&prefilter_key(&window_start), ""))?;
        let groups = group_by_model(&rows, |row| {
            let ts = parse_created_at(&row.created_at)?;
            (ts >= window_start && ts < window_end).then(|| start_of_hour(&ts))
        });

        let mut buckets: BTreeMap<DateTime<Local>, HeatmapBucket> = BTreeMap::new();
        for ((hour, model), sums) in &groups {
            let cost = self.cost_of(model, sums);
            let bucket = buckets.entry(*hour).or_insert_with(|| HeatmapBucket {
                day: hour.format("%m-%d %H").to_string(),
                bucket: hour.format("%Y-%m-%d %H:00:00").to_string(),
                ..Default::default()
            });
            bucket.total_requests += sums.requests;
            bucket.input_tokens += sums.input;
            bucket.output_tokens += sums.output;
            bucket.reasoning_tokens += sums.reasoning;
            bucket.total_cost += cost.total_cost;
        }
        Ok(buckets.into_values().rev().take(total_hours).collect())
    }

    pub fn stats_since(&self, platform: &str) -> StoreResult<LogStats> {
        self.stats_since_at(platform, Local::now())
    }

    /// Totals for the local calendar day of `now` plus a dense 24-slot hourly series.
    pub fn stats_since_at(&self, platform: &str, now: DateTime<Local>) -> StoreResult<LogStats> {
        let series_start = start_of_day(&now);
        let series_end = series_start + Duration::hours(SERIES_HOURS as i64);
        // Read back one extra day so rows written with another offset near midnight are seen.
        let query_start = series_start - Duration::hours(24);

        let mut stats = LogStats {
            series: (0..SERIES_HOURS)
                .map(|i| LogStatsSeries {
                    day: format_local(&(series_start + Duration::hours(i as i64))),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let rows =
            empty_if_missing(self.store.usage_rows_since(&prefilter_key(&query_start), platform))?;
        let groups = group_by_model(&rows, |row| {
            let ts = parse_created_at(&row.created_at)?;
            if ts < series_start || ts >= series_end {
                return None;
            }
            let index = (ts - series_start).num_hours();
            (0..SERIES_HOURS as i64)
                .contains(&index)
                .then_some(index as usize)
        });

        for ((index, model), sums) in &groups {
            let cost = self.cost_of(model, sums);
            let slot = &mut stats.series[*index];
            slot.total_requests += sums.requests;
            slot.input_tokens += sums.input;
            slot.output_tokens += sums.output;
            slot.reasoning_tokens += sums.reasoning;
            slot.cache_create_tokens += sums.cache_create;
            slot.cache_read_tokens += sums.cache_read;
            slot.total_cost += cost.total_cost;

            stats.total_requests += sums.requests;
            stats.input_tokens += sums.input;
            stats.output_tokens += sums.output;
            stats.reasoning_tokens += sums.reasoning;
            stats.cache_create_tokens += sums.cache_create;
            stats.cache_read_tokens += sums.cache_read;
            stats.cost_input += cost.input_cost;
            stats.cost_output += cost.output_cost;
            stats.cost_cache_create += cost.cache_create_cost;
            stats.cost_cache_read += cost.cache_read_cost;
            stats.cost_total += cost.total_cost;
        }
        Ok(stats)
    }

    pub fn provider_daily_stats(&self, platform: &str) -> StoreResult<Vec<ProviderDailyStat>> {
        self.provider_daily_stats_at(platform, Local::now())
    }

    /// One row per provider for the local calendar day of `now`, busiest first.
    pub fn provider_daily_stats_at(
        &self,
        platform: &str,
        now: DateTime<Local>,
    ) -> StoreResult<Vec<ProviderDailyStat>> {
        let start = start_of_day(&now);
        let end = start + Duration::hours(24);

        let rows = empty_if_missing(self.store.usage_rows_since(&prefilter_key(&start), platform))?;
        let groups = group_by_model(&rows, |row| {
            let ts = parse_created_at(&row.created_at)?;
            if ts < start || ts >= end {
                return None;
            }
            let name = row.provider.trim();
            Some(if name.is_empty() {
                UNKNOWN_PROVIDER_LABEL.to_string()
            } else {
                name.to_string()
            })
        });

        let mut by_provider: BTreeMap<String, ProviderDailyStat> = BTreeMap::new();
        for ((provider, model), sums) in &groups {
            let cost = self.cost_of(model, sums);
            let stat = by_provider
                .entry(provider.clone())
                .or_insert_with(|| ProviderDailyStat {
                    provider: provider.clone(),
                    ..Default::default()
                });
            stat.total_requests += sums.requests;
            stat.successful_requests += sums.successful;
            stat.failed_requests += sums.requests - sums.successful;
            stat.input_tokens += sums.input;
            stat.output_tokens += sums.output;
            stat.reasoning_tokens += sums.reasoning;
            stat.cache_create_tokens += sums.cache_create;
            stat.cache_read_tokens += sums.cache_read;
            stat.cost_total += cost.total_cost;
        }

        let mut stats: Vec<ProviderDailyStat> = by_provider
            .into_values()
            .map(|mut stat| {
                if stat.total_requests > 0 {
                    stat.success_rate =
                        stat.successful_requests as f64 / stat.total_requests as f64;
                }
                stat
            })
            .collect();
        stats.sort_by(|a, b| {
            b.total_requests
                .cmp(&a.total_requests)
                .then_with(|| a.provider.cmp(&b.provider))
        });
        Ok(stats)
    }
}
