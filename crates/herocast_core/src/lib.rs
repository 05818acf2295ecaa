pub mod backoff;
pub mod errors;
pub mod models;
pub mod segmenter;

pub use backoff::{compute_delay, RetryConfig, RetryConfigError};
pub use errors::{classify, Classification, Classify, ErrorCategory, ErrorShape};
pub use segmenter::{segment, Segmentation};
