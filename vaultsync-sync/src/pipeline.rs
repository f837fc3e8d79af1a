//! Run parameters: what to sync and how.

use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use vaultsync_core::document::FilePolicy;
use vaultsync_core::{AppConfig, ItemId};

use crate::retry::RetryPolicy;

/// Which items a run considers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncScope {
    /// Every item the source lists.
    All,
    /// Upstream query filter, passed through untouched.
    Filter(Value),
    /// Items edited at or after the timestamp.
    ModifiedSince(DateTime<Utc>),
    /// Exactly these items; listing is skipped.
    Items(Vec<ItemId>),
}

impl SyncScope {
    /// Filter for the upstream listing query.
    pub fn query_filter(&self) -> Option<Value> {
        match self {
            Self::All | Self::Items(_) => None,
            Self::Filter(f) => Some(f.clone()),
            Self::ModifiedSince(ts) => Some(json!({
                "timestamp": "last_edited_time",
                "last_edited_time": { "on_or_after": ts.to_rfc3339() }
            })),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::All => "all items".into(),
            Self::Filter(_) => "filtered items".into(),
            Self::ModifiedSince(ts) => format!("items modified since {}", ts.to_rfc3339()),
            Self::Items(ids) => format!("{} selected item(s)", ids.len()),
        }
    }
}

/// Knobs for one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Directory documents are written to.
    pub destination: PathBuf,
    pub file_policy: FilePolicy,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub requests_per_second: f64,
    pub burst: u32,
    pub page_size: usize,
    pub overwrite_existing: bool,
    /// In-batch filename collisions tolerated by pre-flight validation.
    pub max_conflicts: usize,
    pub backup_retention: usize,
    pub cache_max_age: ChronoDuration,
    pub retry: RetryPolicy,
}

impl SyncOptions {
    /// Defaults for writing into `destination`.
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        let mut config = AppConfig::default();
        config.destination.vault_path = destination.into();
        config.destination.subfolder = None;
        Self::from_config(&config)
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let sync = &config.sync;
        Self {
            destination: config.destination.sync_path(),
            file_policy: sync.file_policy(),
            batch_size: sync.batch_size.max(1),
            max_concurrency: sync.max_concurrency.max(1),
            requests_per_second: sync.rate_limit.requests_per_second,
            burst: sync.rate_limit.burst,
            page_size: config.source.page_size.clamp(1, 100),
            overwrite_existing: sync.overwrite_existing,
            max_conflicts: sync.max_conflicts,
            backup_retention: sync.backup_retention,
            cache_max_age: ChronoDuration::days(sync.cache_max_age_days.max(0)),
            retry: RetryPolicy::from_config(&sync.retry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_since_builds_a_timestamp_filter() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let filter = SyncScope::ModifiedSince(ts).query_filter().unwrap();
        assert_eq!(filter["timestamp"], "last_edited_time");
        assert_eq!(
            filter["last_edited_time"]["on_or_after"],
            "2024-05-01T00:00:00+00:00"
        );
        assert!(SyncScope::All.query_filter().is_none());
    }

    #[test]
    fn options_follow_config() {
        let mut config = AppConfig::default();
        config.destination.vault_path = PathBuf::from("/vault");
        config.destination.subfolder = Some("notion".into());
        config.sync.batch_size = 0;
        config.sync.cache_max_age_days = 7;

        let opts = SyncOptions::from_config(&config);
        assert_eq!(opts.destination, PathBuf::from("/vault/notion"));
        assert_eq!(opts.batch_size, 1);
        assert_eq!(opts.cache_max_age, ChronoDuration::days(7));
    }
}
