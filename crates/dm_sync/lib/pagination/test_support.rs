use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use herocast_core::{Classify, ErrorShape};

use super::{FeedItem, Page, PageFetcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestItem {
    pub id: String,
}

impl FeedItem for TestItem {
    fn identity_key(&self) -> &str {
        &self.id
    }
}

pub(crate) fn items(ids: &[&str]) -> Vec<TestItem> {
    ids.iter()
        .map(|id| TestItem { id: id.to_string() })
        .collect()
}

pub(crate) fn ids(items: &[TestItem]) -> Vec<&str> {
    items.iter().map(|item| item.id.as_str()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockError {
    pub status: Option<u16>,
    pub message: String,
}

impl MockError {
    pub(crate) fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            message: format!("upstream returned {status}"),
        }
    }
}

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Classify for MockError {
    fn error_shape(&self) -> ErrorShape<'_> {
        ErrorShape {
            status: self.status,
            message: Some(&self.message),
            ..ErrorShape::default()
        }
    }
}

pub(crate) type Scripted = Result<Page<TestItem>, MockError>;

/// Replays scripted pages in call order and records every cursor it was asked for.
///
/// Each call claims its reply and latency when it starts, so a slow call keeps its own reply
/// even if a later call finishes first.
#[derive(Default)]
pub(crate) struct MockPageFetcher {
    plan: Mutex<VecDeque<Scripted>>,
    cursors: Mutex<Vec<Option<String>>>,
    latency: Duration,
    call_latencies: Mutex<VecDeque<Duration>>,
}

impl MockPageFetcher {
    pub(crate) fn with_plan(plan: Vec<Scripted>) -> Self {
        Self {
            plan: Mutex::new(plan.into_iter().collect()),
            cursors: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            call_latencies: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn with_latency(self, latency: Duration) -> Self {
        Self { latency, ..self }
    }

    /// Per-call latencies in call order; calls past the end use `with_latency`.
    pub(crate) fn with_call_latencies(self, latencies: Vec<Duration>) -> Self {
        Self {
            call_latencies: Mutex::new(latencies.into_iter().collect()),
            ..self
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.cursors.lock().expect("cursors mutex poisoned").len()
    }

    pub(crate) fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().expect("cursors mutex poisoned").clone()
    }
}

impl PageFetcher for MockPageFetcher {
    type Item = TestItem;
    type Error = MockError;

    fn fetch_page<'a>(&'a self, cursor: Option<String>) -> BoxFuture<'a, Scripted> {
        Box::pin(async move {
            self.cursors
                .lock()
                .expect("cursors mutex poisoned")
                .push(cursor);
            let reply = self
                .plan
                .lock()
                .expect("plan mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(MockError {
                        status: Some(418),
                        message: "scripted responses exhausted".to_string(),
                    })
                });
            let latency = self
                .call_latencies
                .lock()
                .expect("latency mutex poisoned")
                .pop_front()
                .unwrap_or(self.latency);

            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            reply
        })
    }
}
