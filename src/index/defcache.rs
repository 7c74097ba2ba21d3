//! Front-line definition cache
//!
//! Remembers which series were indexed and when, so the index only sees a
//! definition on first sight of a series and then about once per
//! `refresh_interval` of data time.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Admission, DefinitionIndex};
use crate::engine::DefinitionSink;
use crate::types::{MetricData, MetricDefinition};

/// Default age after which a cached definition is indexed again
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Definition sink that deduplicates writes to a [`DefinitionIndex`]
pub struct DefCache {
    index: Arc<DefinitionIndex>,
    /// id -> `lastUpdate` of the last queued definition
    seen: DashMap<String, i64>,
    refresh_secs: i64,
}

impl DefCache {
    /// Create a cache in front of `index`
    pub fn new(index: Arc<DefinitionIndex>, refresh_interval: Duration) -> Self {
        Self {
            index,
            seen: DashMap::new(),
            refresh_secs: refresh_interval.as_secs() as i64,
        }
    }

    /// Whether `metric` has to be (re)indexed
    fn needs_index(&self, metric: &MetricData) -> bool {
        match self.seen.get(&metric.id) {
            Some(last) => metric.time.saturating_sub(*last) >= self.refresh_secs,
            None => true,
        }
    }

    /// `lastUpdate` of the last queued definition of `id`
    pub fn last_update(&self, id: &str) -> Option<i64> {
        self.seen.get(id).map(|v| *v)
    }

    /// Number of cached series
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no series is cached
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[async_trait]
impl DefinitionSink for DefCache {
    async fn add(&self, metric: &MetricData) {
        if !self.needs_index(metric) {
            return;
        }

        let def = MetricDefinition::from(metric);
        match self.index.index_definition(&def).await {
            Ok(Admission::Queued) => {
                self.seen.insert(metric.id.clone(), metric.time);
            },
            Ok(Admission::Discarded) => {
                debug!(id = %metric.id, "definition shed during warmup");
            },
            Err(e) => {
                warn!(id = %metric.id, error = %e, "failed to index definition");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexConfig, MemoryBackend};
    use crate::metrics::OUTCOME_QUEUED;
    use prometheus::Registry;

    fn metric(id: &str, time: i64) -> MetricData {
        MetricData {
            id: id.to_string(),
            org_id: 1,
            name: "a.b".to_string(),
            metric: "a.b".to_string(),
            interval: 10,
            time,
            value: 1.0,
            ..Default::default()
        }
    }

    async fn cache(warmup_window: Duration, percent: u32) -> DefCache {
        let config = IndexConfig {
            warmup_window,
            warmup_percent: percent,
            ..Default::default()
        };
        let index = DefinitionIndex::init(config, Arc::new(MemoryBackend::new()), &Registry::new())
            .await
            .unwrap();
        DefCache::new(Arc::new(index), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_indexes_once_per_refresh_interval() {
        let cache = cache(Duration::ZERO, 1).await;

        cache.add(&metric("1.a", 1_000)).await;
        cache.add(&metric("1.a", 1_010)).await;
        cache.add(&metric("1.a", 2_000)).await;
        assert_eq!(cache.index.metrics().writes(OUTCOME_QUEUED), 1);
        assert_eq!(cache.last_update("1.a"), Some(1_000));

        cache.add(&metric("1.a", 1_000 + 3600)).await;
        assert_eq!(cache.index.metrics().writes(OUTCOME_QUEUED), 2);
        assert_eq!(cache.last_update("1.a"), Some(4_600));

        cache.index.stop().await;
    }

    #[tokio::test]
    async fn test_extreme_times_do_not_overflow() {
        let cache = cache(Duration::ZERO, 1).await;

        cache.add(&metric("1.a", 1_000)).await;
        cache.add(&metric("1.a", i64::MIN)).await;
        assert_eq!(cache.last_update("1.a"), Some(1_000));

        cache.add(&metric("1.b", i64::MIN)).await;
        cache.add(&metric("1.b", i64::MAX)).await;
        assert_eq!(cache.last_update("1.b"), Some(i64::MAX));

        cache.index.stop().await;
    }

    #[tokio::test]
    async fn test_discarded_writes_not_cached() {
        let cache = cache(Duration::from_secs(3600), 0).await;

        cache.add(&metric("1.a", 1_000)).await;
        cache.add(&metric("1.a", 1_010)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.index.metrics().writes(crate::metrics::OUTCOME_DISCARDED), 2);

        cache.index.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_definitions_not_cached() {
        let cache = cache(Duration::ZERO, 1).await;

        let mut bad = metric("1.a", 1_000);
        bad.interval = 0;
        cache.add(&bad).await;
        assert!(cache.is_empty());

        cache.index.stop().await;
    }
}
