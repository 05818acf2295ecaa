use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::pagination::{PageFetcher, PaginatedFeed};

/// Background refresh cadence for conversation and message lists.
pub const AUTO_REFRESH_INTERVAL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Periodically refreshes a feed while it is visible and healthy.
///
/// Holds only a weak reference, so the task ends on its own once the feed is dropped.
pub struct AutoRefresher {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl AutoRefresher {
    pub fn spawn<F: PageFetcher>(
        feed: Weak<PaginatedFeed<F>>,
        interval: Duration,
        visibility: watch::Receiver<Visibility>,
        shutdown: &CancellationToken,
    ) -> Self {
        let stop = shutdown.child_token();
        let handle = tokio::spawn(refresh_loop(feed, interval, visibility, stop.clone()));
        Self { stop, handle }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

async fn refresh_loop<F: PageFetcher>(
    feed: Weak<PaginatedFeed<F>>,
    interval: Duration,
    mut visibility: watch::Receiver<Visibility>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = *visibility.borrow_and_update();
    let mut visibility_open = true;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let Some(feed) = feed.upgrade() else { break };
                if last_seen == Visibility::Hidden {
                    tracing::debug!(event = "auto_refresh_skipped", reason = "hidden", "skipping auto refresh");
                    continue;
                }
                refresh_if_idle(&feed, "interval");
            }
            changed = visibility.changed(), if visibility_open => {
                if changed.is_err() {
                    visibility_open = false;
                    continue;
                }
                let current = *visibility.borrow_and_update();
                let resumed = last_seen == Visibility::Hidden && current == Visibility::Visible;
                last_seen = current;
                if resumed {
                    let Some(feed) = feed.upgrade() else { break };
                    if refresh_if_idle(&feed, "visible") {
                        ticker.reset();
                    }
                }
            }
        }
    }

    tracing::debug!(event = "auto_refresh_stopped", "auto refresh loop exited");
}

fn refresh_if_idle<F: PageFetcher>(feed: &PaginatedFeed<F>, trigger: &'static str) -> bool {
    if feed.is_retry_active() || feed.is_loading() {
        tracing::debug!(
            event = "auto_refresh_skipped",
            feed = %feed.options().label,
            reason = "busy",
            trigger,
            "skipping auto refresh while a request or retry is pending"
        );
        return false;
    }
    tracing::debug!(
        event = "auto_refresh",
        feed = %feed.options().label,
        trigger,
        "refreshing feed in background"
    );
    feed.refresh();
    true
}
