use std::fmt;
use std::time::Duration;

/// Wait applied to rate-limited calls when the upstream gives no retry-after hint.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_millis(60_000);

pub const API_CODE_NO_API_KEY: &str = "NO_API_KEY";
pub const API_CODE_INVALID_API_KEY: &str = "INVALID_API_KEY";
pub const API_CODE_RATE_LIMITED: &str = "RATE_LIMITED";
pub const API_CODE_SERVER_ERROR: &str = "SERVER_ERROR";

/// Normalized failure classes used by retry and surfacing logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    Network,
    NotFound,
    ServerError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::Auth => "Your DirectCast API key is invalid or has expired.",
            Self::RateLimit => "You've hit the rate limit for DirectCast API.",
            Self::Network => "Unable to connect to DirectCast servers.",
            Self::NotFound => "The requested resource was not found.",
            Self::ServerError => "DirectCast is experiencing technical difficulties.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            Self::Auth => "Please update your API key in Account Settings.",
            Self::RateLimit => "Please wait a moment before trying again.",
            Self::Network => "Please check your internet connection and try again.",
            Self::NotFound => "The conversation or message may have been deleted.",
            Self::ServerError => "Please try again later.",
            Self::Unknown => "Please try again or contact support if the issue persists.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boundary view of a raw failure.
///
/// Upstream errors arrive with whatever subset of status, message, body code and retry-after
/// the transport happened to capture. Each error type projects itself into this shape once so
/// the classifier never has to know about concrete transports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorShape<'a> {
    pub status: Option<u16>,
    pub message: Option<&'a str>,
    pub api_code: Option<&'a str>,
    pub retry_after: Option<Duration>,
}

impl<'a> ErrorShape<'a> {
    pub fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_message(message: &'a str) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }
}

/// Result of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
    /// Only set for rate limits.
    pub suggested_wait: Option<Duration>,
}

impl Classification {
    fn new(category: ErrorCategory, retryable: bool) -> Self {
        Self {
            category,
            retryable,
            suggested_wait: None,
        }
    }

    fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            category: ErrorCategory::RateLimit,
            retryable: true,
            suggested_wait: Some(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT)),
        }
    }
}

/// Errors that can be fed to the retry driver.
pub trait Classify {
    fn error_shape(&self) -> ErrorShape<'_>;

    fn classify(&self) -> Classification {
        classify(&self.error_shape())
    }
}

impl<T> Classify for &T
where
    T: Classify + ?Sized,
{
    fn error_shape(&self) -> ErrorShape<'_> {
        (**self).error_shape()
    }
}

const AUTH_PATTERNS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid api key",
    "authentication failed",
];
const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "too many requests", "throttled"];
const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "network",
    "connection",
    "fetch failed",
    "econnrefused",
    "enotfound",
];
const NOT_FOUND_PATTERNS: &[&str] = &["not found"];
const SERVER_ERROR_PATTERNS: &[&str] = &["internal server error", "server error"];

/// Assigns a category to one failure.
///
/// Body codes win over everything else, then each category is tried in priority order against
/// the status code and the lower-cased message.
pub fn classify(shape: &ErrorShape<'_>) -> Classification {
    if let Some(code) = shape.api_code {
        match code {
            API_CODE_NO_API_KEY | API_CODE_INVALID_API_KEY => {
                return Classification::new(ErrorCategory::Auth, false)
            }
            API_CODE_RATE_LIMITED => return Classification::rate_limited(shape.retry_after),
            API_CODE_SERVER_ERROR => return Classification::new(ErrorCategory::ServerError, true),
            _ => {}
        }
    }

    let status = shape.status;
    let message = shape.message.map(str::to_lowercase).unwrap_or_default();
    let mentions = |patterns: &[&str]| patterns.iter().any(|pattern| message.contains(pattern));

    if matches!(status, Some(401 | 403)) || mentions(AUTH_PATTERNS) {
        return Classification::new(ErrorCategory::Auth, false);
    }
    if status == Some(429) || mentions(RATE_LIMIT_PATTERNS) {
        return Classification::rate_limited(shape.retry_after);
    }
    if matches!(status, Some(502..=504)) || mentions(NETWORK_PATTERNS) {
        return Classification::new(ErrorCategory::Network, true);
    }
    if status == Some(404) || mentions(NOT_FOUND_PATTERNS) {
        return Classification::new(ErrorCategory::NotFound, false);
    }
    if matches!(status, Some(500..=599)) || mentions(SERVER_ERROR_PATTERNS) {
        return Classification::new(ErrorCategory::ServerError, true);
    }

    // Unclassified failures still get a retry budget.
    Classification::new(ErrorCategory::Unknown, true)
}

/// Renders the user-facing message plus suggested action for a failure.
pub fn format_error_message(classification: &Classification, raw_message: &str) -> String {
    let headline = match classification.category {
        ErrorCategory::Unknown if !raw_message.trim().is_empty() => raw_message,
        category => category.user_message(),
    };
    format!("{headline} {}", classification.category.action())
}
