mod feed;
mod fetcher;

pub use feed::{FeedError, FeedOptions, FeedSnapshot, PaginatedFeed, RetryState};
pub use fetcher::{FeedItem, Page, PageFetcher};

#[cfg(test)]
pub(crate) mod test_support;
