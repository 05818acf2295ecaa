use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use herocast_core::errors::format_error_message;
use herocast_core::{Classification, ErrorCategory, RetryConfig};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::fetcher::{FeedItem, Page, PageFetcher};
use crate::credentials::CredentialStore;
use crate::resilience::{run_with_retry, RetryOk, RetryTerminal};
use crate::server::monitoring::FeedMetrics;

/// Progress of the current retry cycle, reset on success, manual retry and refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Failed attempts in the current cycle. Never exceeds `RetryConfig::max_attempts`.
    pub attempts: u32,
    pub next_retry_at_epoch_ms: Option<i64>,
    pub is_retrying: bool,
}

/// User-facing failure surfaced once a cycle ends without a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedError {
    pub category: ErrorCategory,
    pub message: String,
    /// Raw upstream error text, kept for logs and `--verbose` style output.
    pub detail: String,
    pub can_retry: bool,
}

impl FeedError {
    fn new(classification: &Classification, detail: String) -> Self {
        Self {
            category: classification.category,
            message: format_error_message(classification, &detail),
            detail,
            can_retry: classification.category != ErrorCategory::Auth,
        }
    }
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot<T> {
    pub items: Vec<T>,
    pub is_loading: bool,
    pub has_more: bool,
    pub error: Option<FeedError>,
    pub retry: RetryState,
}

/// Identifies what a feed lists and which credential it spends.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedOptions {
    pub account_id: String,
    /// Human-readable label used in logs, e.g. `inbox:default` or `conversation:1-2`.
    pub label: String,
    pub retry: RetryConfig,
}

impl FeedOptions {
    pub fn new(account_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            label: label.into(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(self, retry: RetryConfig) -> Self {
        Self { retry, ..self }
    }
}

struct FeedState<T> {
    items: Vec<T>,
    seen: HashSet<String>,
    cursor: Option<String>,
    has_more: bool,
    is_loading: bool,
    error: Option<FeedError>,
    retry: RetryState,
    /// Bumped whenever a new cycle starts or the feed is cancelled; older cycles stop applying.
    generation: u64,
    active: Option<CancellationToken>,
    last_append: bool,
}

impl<T> Default for FeedState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            cursor: None,
            has_more: true,
            is_loading: false,
            error: None,
            retry: RetryState::default(),
            generation: 0,
            active: None,
            last_append: false,
        }
    }
}

struct FeedShared<F: PageFetcher> {
    fetcher: F,
    options: FeedOptions,
    credentials: CredentialStore,
    metrics: FeedMetrics,
    state: Mutex<FeedState<F::Item>>,
    revision: watch::Sender<u64>,
}

/// Cursor-paginated list kept fresh through the retry driver.
///
/// Every request runs as its own spawned cycle. Starting a new request cancels the previous
/// cycle, and results from a superseded or cancelled cycle are discarded, so the last request
/// always wins. Dropping the feed cancels whatever is pending.
///
/// Request methods spawn onto the ambient tokio runtime and must be called from inside one.
pub struct PaginatedFeed<F: PageFetcher> {
    shared: Arc<FeedShared<F>>,
}

impl<F: PageFetcher> PaginatedFeed<F> {
    pub fn new(
        fetcher: F,
        options: FeedOptions,
        credentials: CredentialStore,
        metrics: FeedMetrics,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(FeedShared {
                fetcher,
                options,
                credentials,
                metrics,
                state: Mutex::new(FeedState::default()),
                revision,
            }),
        }
    }

    pub fn options(&self) -> &FeedOptions {
        &self.shared.options
    }

    pub fn snapshot(&self) -> FeedSnapshot<F::Item> {
        let state = self.shared.lock();
        FeedSnapshot {
            items: state.items.clone(),
            is_loading: state.is_loading,
            has_more: state.has_more,
            error: state.error.clone(),
            retry: state.retry,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().is_loading
    }

    pub fn is_retry_active(&self) -> bool {
        self.shared.lock().retry.is_retrying
    }

    /// Receives a new revision number after every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Resolves once nothing is in flight and no retry is pending.
    pub async fn wait_until_settled(&self) {
        let mut changes = self.subscribe();
        loop {
            {
                let state = self.shared.lock();
                if !state.is_loading && !state.retry.is_retrying {
                    return;
                }
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Cancels any pending cycle and fetches the first page from scratch.
    pub fn refresh(&self) {
        let mut state = self.shared.lock();
        state.cursor = None;
        tracing::debug!(
            event = "feed_refresh_requested",
            feed = %self.shared.options.label,
            "refreshing feed"
        );
        self.start_cycle(&mut state, false);
    }

    /// Fetches the next page. Returns `false` when the request was ignored because a page is
    /// in flight, the list is exhausted or a retry cycle is active.
    pub fn load_more(&self) -> bool {
        let mut state = self.shared.lock();
        if state.is_loading || !state.has_more || state.retry.is_retrying {
            return false;
        }
        self.start_cycle(&mut state, true);
        true
    }

    /// Manual retry from the stored cursor with a fresh attempt budget.
    ///
    /// Repeats the failed request's mode: a failed `load_more` appends, a failed `refresh`
    /// replaces. Ignored while a page is in flight, and when there is neither a surfaced error
    /// nor a pending retry.
    pub fn retry_after_error(&self) -> bool {
        let mut state = self.shared.lock();
        if state.is_loading || (state.error.is_none() && !state.retry.is_retrying) {
            return false;
        }
        let append = state.last_append;
        tracing::info!(
            event = "feed_manual_retry",
            feed = %self.shared.options.label,
            append,
            "manual retry requested"
        );
        self.start_cycle(&mut state, append);
        true
    }

    /// Stops the pending cycle, in flight or sleeping, without touching loaded items.
    pub fn cancel(&self) {
        let mut state = self.shared.lock();
        if let Some(token) = state.active.take() {
            token.cancel();
        }
        state.generation = state.generation.wrapping_add(1);
        state.is_loading = false;
        set_retry_state(&self.shared.metrics, &mut state.retry, RetryState::default());
        drop(state);
        self.shared.notify();
    }

    fn start_cycle(&self, state: &mut FeedState<F::Item>, append: bool) {
        if let Some(previous) = state.active.take() {
            previous.cancel();
        }
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let token = CancellationToken::new();
        state.active = Some(token.clone());
        state.is_loading = true;
        state.error = None;
        state.last_append = append;
        set_retry_state(&self.shared.metrics, &mut state.retry, RetryState::default());
        let cursor = if append { state.cursor.clone() } else { None };

        tokio::spawn(run_cycle(
            Arc::clone(&self.shared),
            generation,
            token,
            cursor,
            append,
        ));
        self.shared.notify();
    }
}

impl<F: PageFetcher> Drop for PaginatedFeed<F> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<F: PageFetcher> FeedShared<F> {
    fn lock(&self) -> MutexGuard<'_, FeedState<F::Item>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    /// Applies `update` only if `generation` is still the live cycle.
    fn with_current<R>(
        &self,
        generation: u64,
        token: &CancellationToken,
        update: impl FnOnce(&mut FeedState<F::Item>) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if state.generation != generation || token.is_cancelled() {
            return None;
        }
        let result = update(&mut state);
        drop(state);
        self.notify();
        Some(result)
    }
}

async fn run_cycle<F: PageFetcher>(
    shared: Arc<FeedShared<F>>,
    generation: u64,
    token: CancellationToken,
    cursor: Option<String>,
    append: bool,
) {
    let outcome = run_with_retry(
        &shared.options.retry,
        &token,
        |attempt| {
            shared.metrics.fetch_attempts_total.inc();
            shared.with_current(generation, &token, |state| state.is_loading = true);
            tracing::debug!(
                event = "feed_fetch_attempt",
                feed = %shared.options.label,
                attempt,
                append,
                "fetching page"
            );
            shared.fetcher.fetch_page(cursor.clone())
        },
        |notice| {
            let next_retry_at = epoch_ms_after(notice.delay);
            let applied = shared.with_current(generation, &token, |state| {
                state.is_loading = false;
                set_retry_state(
                    &shared.metrics,
                    &mut state.retry,
                    RetryState {
                        attempts: notice.attempt,
                        next_retry_at_epoch_ms: Some(next_retry_at),
                        is_retrying: true,
                    },
                );
            });
            if applied.is_some() {
                shared.metrics.retries_scheduled_total.inc();
            }
        },
    )
    .await;

    match outcome {
        Ok(RetryOk { value, attempts }) => apply_success(&shared, generation, &token, value, append, attempts),
        Err(RetryTerminal::Cancelled) => {
            tracing::debug!(
                event = "feed_cycle_cancelled",
                feed = %shared.options.label,
                generation,
                "discarding cancelled feed cycle"
            );
        }
        Err(RetryTerminal::Failed(failure)) => {
            let classification = failure.classification;
            let detail = failure.error.to_string();
            let applied = shared.with_current(generation, &token, |state| {
                if classification.category == ErrorCategory::Auth
                    && shared.credentials.invalidate(&shared.options.account_id)
                {
                    shared.metrics.credential_invalidations_total.inc();
                }
                state.is_loading = false;
                state.active = None;
                set_retry_state(
                    &shared.metrics,
                    &mut state.retry,
                    RetryState {
                        attempts: failure.attempts,
                        next_retry_at_epoch_ms: None,
                        is_retrying: false,
                    },
                );
                state.error = Some(FeedError::new(&classification, detail.clone()));
            });
            if applied.is_some() {
                shared.metrics.record_failure(classification.category);
                tracing::error!(
                    event = "feed_fetch_failed",
                    feed = %shared.options.label,
                    category = classification.category.as_str(),
                    attempts = failure.attempts,
                    exhausted_retryable = failure.exhausted_retryable,
                    error = %detail,
                    "feed request failed"
                );
            }
        }
    }
}

fn apply_success<F: PageFetcher>(
    shared: &FeedShared<F>,
    generation: u64,
    token: &CancellationToken,
    page: Page<F::Item>,
    append: bool,
    attempts: u32,
) {
    let applied = shared.with_current(generation, token, |state| {
        let added = merge_page(state, page, append);
        state.is_loading = false;
        state.error = None;
        state.active = None;
        set_retry_state(&shared.metrics, &mut state.retry, RetryState::default());
        (added, state.items.len(), state.has_more)
    });

    if let Some((added, total, has_more)) = applied {
        shared.metrics.pages_loaded_total.inc();
        tracing::info!(
            event = "feed_page_loaded",
            feed = %shared.options.label,
            append,
            attempts,
            added,
            total,
            has_more,
            "applied page"
        );
    }
}

/// Replaces or extends the list, skipping entries whose identity is already present.
fn merge_page<T: FeedItem>(state: &mut FeedState<T>, page: Page<T>, append: bool) -> usize {
    if !append {
        state.items.clear();
        state.seen.clear();
    }
    let before = state.items.len();
    for item in page.items {
        if state.seen.insert(item.identity_key().to_string()) {
            state.items.push(item);
        }
    }
    state.has_more = page.next_cursor.is_some();
    state.cursor = page.next_cursor;
    state.items.len() - before
}

fn set_retry_state(metrics: &FeedMetrics, current: &mut RetryState, next: RetryState) {
    match (current.is_retrying, next.is_retrying) {
        (false, true) => {
            metrics.feeds_retrying.inc();
        }
        (true, false) => {
            metrics.feeds_retrying.dec();
        }
        _ => {}
    }
    *current = next;
}

fn epoch_ms_after(delay: Duration) -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|now| now.saturating_add(delay).as_millis() as i64)
        .unwrap_or_default()
}
