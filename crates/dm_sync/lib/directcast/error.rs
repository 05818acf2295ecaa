use std::error::Error as StdError;
use std::time::Duration;

use herocast_core::errors::API_CODE_NO_API_KEY;
use herocast_core::{Classify, ErrorShape};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectCastError {
    #[error("no DirectCast API key configured for account `{account_id}`")]
    MissingApiKey { account_id: String },
    #[error("DirectCast returned HTTP {status}: {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
        retry_after: Option<Duration>,
    },
    #[error("DirectCast transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid DirectCast request: {0}")]
    InvalidRequest(String),
}

impl Classify for DirectCastError {
    fn error_shape(&self) -> ErrorShape<'_> {
        match self {
            Self::MissingApiKey { .. } => ErrorShape {
                api_code: Some(API_CODE_NO_API_KEY),
                message: Some("no api key configured"),
                ..ErrorShape::default()
            },
            Self::Api {
                status,
                message,
                code,
                retry_after,
            } => ErrorShape {
                status: Some(*status),
                message: Some(message),
                api_code: code.as_deref(),
                retry_after: *retry_after,
            },
            Self::Transport(err) => transport_shape(err),
            Self::InvalidRequest(message) => ErrorShape {
                status: Some(400),
                message: Some(message),
                ..ErrorShape::default()
            },
        }
    }
}

/// Projects reqwest's flags onto fixed phrases the classifier recognizes.
///
/// Timeouts are reported as 503 like the hosted proxy routes do.
fn transport_shape(err: &reqwest::Error) -> ErrorShape<'static> {
    if let Some(status) = err.status() {
        return ErrorShape::with_status(status.as_u16());
    }
    if err.is_timeout() {
        return ErrorShape {
            status: Some(503),
            message: Some("request timeout"),
            ..ErrorShape::default()
        };
    }

    let message = if err.is_connect() {
        "connection failed"
    } else if err.is_request() || err.is_body() {
        "network request failed"
    } else if err.is_decode() {
        "malformed response body"
    } else {
        "unexpected transport failure"
    };
    ErrorShape::with_message(message)
}

/// Joins an error and its sources with `| caused_by:` for single-line logs.
pub(crate) fn render_error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(next) = source {
        parts.push(next.to_string());
        source = next.source();
    }
    parts.join(" | caused_by: ")
}

pub(crate) fn log_transport_diagnostics(endpoint: &str, err: &reqwest::Error) {
    tracing::debug!(
        event = "directcast_transport_error",
        endpoint,
        reqwest_status = ?err.status().map(|status| status.as_u16()),
        reqwest_is_timeout = err.is_timeout(),
        reqwest_is_connect = err.is_connect(),
        reqwest_is_decode = err.is_decode(),
        reqwest_is_body = err.is_body(),
        reqwest_is_request = err.is_request(),
        reqwest_error_chain = %render_error_chain(err),
        "captured reqwest diagnostics"
    );
}
