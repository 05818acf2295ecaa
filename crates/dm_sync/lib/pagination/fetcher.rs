use std::fmt::Display;
use std::sync::Arc;

use futures::future::BoxFuture;
use herocast_core::models::{DirectCastMessage, InboxEntry};
use herocast_core::Classify;

/// Entry kept in a paginated list; identity decides de-duplication when pages overlap.
pub trait FeedItem {
    fn identity_key(&self) -> &str;
}

impl FeedItem for InboxEntry {
    fn identity_key(&self) -> &str {
        InboxEntry::identity_key(self)
    }
}

impl FeedItem for DirectCastMessage {
    fn identity_key(&self) -> &str {
        &self.message_id
    }
}

/// One page returned by a [`PageFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` when this was the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    pub fn with_cursor(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// Fetches one page of a list given an opaque cursor.
///
/// Feeds only ever see this trait, so their retry and cancellation logic can be driven by
/// scripted fetchers in tests.
pub trait PageFetcher: Send + Sync + 'static {
    type Item: FeedItem + Clone + Send + Sync + 'static;
    type Error: Classify + Display + Send + Sync + 'static;

    fn fetch_page<'a>(
        &'a self,
        cursor: Option<String>,
    ) -> BoxFuture<'a, Result<Page<Self::Item>, Self::Error>>;
}

impl<T> PageFetcher for Arc<T>
where
    T: PageFetcher + ?Sized,
{
    type Item = T::Item;
    type Error = T::Error;

    fn fetch_page<'a>(
        &'a self,
        cursor: Option<String>,
    ) -> BoxFuture<'a, Result<Page<Self::Item>, Self::Error>> {
        (**self).fetch_page(cursor)
    }
}
