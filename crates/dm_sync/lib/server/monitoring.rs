use crate::build_info;
use herocast_core::ErrorCategory;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers immutable build metadata for `/metrics` scraping.
///
/// Encoded as a labeled gauge with value `1` so it stays valid Prometheus text exposition.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "dm_sync",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CategoryLabels {
    pub category: &'static str,
}

impl From<ErrorCategory> for CategoryLabels {
    fn from(category: ErrorCategory) -> Self {
        Self {
            category: category.as_str(),
        }
    }
}

/// Counters shared by every paginated feed in the process.
#[derive(Clone, Debug)]
pub struct FeedMetrics {
    /// Every call into a page fetcher, first attempts and retries alike.
    pub fetch_attempts_total: Counter,
    pub pages_loaded_total: Counter,
    pub retries_scheduled_total: Counter,
    /// Terminal failures surfaced to the user, by error category.
    pub failures_total: Family<CategoryLabels, Counter>,
    pub credential_invalidations_total: Counter,
    /// Feeds currently inside a backoff cycle.
    pub feeds_retrying: Gauge,
}

impl FeedMetrics {
    fn init() -> Self {
        Self {
            fetch_attempts_total: Counter::default(),
            pages_loaded_total: Counter::default(),
            retries_scheduled_total: Counter::default(),
            failures_total: Family::default(),
            credential_invalidations_total: Counter::default(),
            feeds_retrying: Gauge::default(),
        }
    }

    /// Unregistered metrics for callers that never expose `/metrics`.
    pub fn detached() -> Self {
        Self::init()
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "fetch_attempts",
            "Total number of page fetch attempts, retries included",
            metrics.fetch_attempts_total.clone(),
        );
        sub_registry.register(
            "pages_loaded",
            "Total number of pages applied to a feed",
            metrics.pages_loaded_total.clone(),
        );
        sub_registry.register(
            "retries_scheduled",
            "Total number of retries scheduled after a retryable failure",
            metrics.retries_scheduled_total.clone(),
        );
        sub_registry.register(
            "failures",
            "Terminal feed failures by error category",
            metrics.failures_total.clone(),
        );
        sub_registry.register(
            "credential_invalidations",
            "API keys cleared after authentication failures",
            metrics.credential_invalidations_total.clone(),
        );
        sub_registry.register(
            "feeds_retrying",
            "Feeds currently waiting out a backoff delay",
            metrics.feeds_retrying.clone(),
        );
        metrics
    }

    pub fn record_failure(&self, category: ErrorCategory) {
        self.failures_total
            .get_or_create(&CategoryLabels::from(category))
            .inc();
    }
}

pub static FEED_METRICS: OnceCell<FeedMetrics> = OnceCell::const_new();

#[cfg(test)]
mod tests {
    use super::{register_build_info_metric, FeedMetrics};
    use crate::build_info;
    use herocast_core::ErrorCategory;
    use prometheus_client::{encoding::text::encode, registry::Registry};

    #[test]
    fn build_info_metric_contains_version_and_commit_labels() {
        let mut registry = Registry::default();
        register_build_info_metric(&mut registry, "dm_sync");

        let mut encoded = String::new();
        encode(&mut encoded, &registry).expect("failed to encode metrics");

        assert!(encoded.contains("dm_sync_build_info"));
        assert!(encoded.contains(&format!("version=\"{}\"", build_info::VERSION)));
        assert!(encoded.contains(&format!("commit=\"{}\"", build_info::short_commit_hash())));
    }

    #[test]
    fn failures_are_labelled_by_category() {
        let mut registry = Registry::default();
        let metrics = FeedMetrics::register(&mut registry, "feed");
        metrics.record_failure(ErrorCategory::RateLimit);
        metrics.record_failure(ErrorCategory::RateLimit);
        metrics.record_failure(ErrorCategory::Auth);

        let mut encoded = String::new();
        encode(&mut encoded, &registry).expect("failed to encode metrics");

        assert!(encoded.contains("feed_failures_total{category=\"rate_limit\"} 2"));
        assert!(encoded.contains("feed_failures_total{category=\"auth\"} 1"));
    }
}
