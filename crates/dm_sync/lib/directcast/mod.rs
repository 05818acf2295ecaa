mod client;
mod error;
mod fetchers;

pub use client::{
    build_rate_limiter, ClientSettings, DirectCastClient, GlobalRateLimiter, ListQuery,
    MessageTarget, SendMessage, DEFAULT_API_URL, DEFAULT_PAGE_LIMIT,
    DEFAULT_REQUESTS_PER_MINUTE, MAX_PAGE_LIMIT, REQUEST_TIMEOUT,
};
pub use error::DirectCastError;
pub use fetchers::{InboxFetcher, MessageFetcher};
