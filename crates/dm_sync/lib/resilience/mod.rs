mod retry;

pub use retry::{run_with_retry, RetryFailure, RetryNotice, RetryOk, RetryTerminal};
