//! Response Handshake Checks
//!
//! Shared request dispatch plus status and header validation for both
//! transports, run before any frame is read. Every wait in here is bounded by
//! the idle timeout.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response};

use super::traits::{AuthErrorKind, ClientError};

/// Longest response body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Bytes read from an error body before giving up on the rest
const MAX_ERROR_BODY_BYTES: usize = MAX_ERROR_BODY_CHARS * 4;

/// Send a request and wait at most `timeout` for the response head
///
/// Dropping the pending request on timeout closes its connection.
///
/// # Errors
///
/// Returns [`ClientError::IdleTimeout`] when no response head arrives in
/// time, or the mapped reqwest error when the request fails.
pub async fn send_bounded(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<Response, ClientError> {
    match tokio::time::timeout(timeout, request.send()).await {
        Ok(sent) => Ok(sent?),
        Err(_) => {
            tracing::warn!(
                timeout = ?timeout,
                "Serving endpoint sent no response head"
            );
            Err(ClientError::IdleTimeout(timeout))
        }
    }
}

/// Turn a non-success response into the matching [`ClientError`]
///
/// # Errors
///
/// Returns [`ClientError::Auth`] for 401/403 and [`ClientError::Http`] for any
/// other non-success status. The error body is read for at most `timeout`
/// and cut to [`MAX_ERROR_BODY_CHARS`].
pub async fn ensure_success(
    response: Response,
    timeout: Duration,
) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let www_authenticate = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = read_error_body(response, timeout).await;

    if let Some(kind) = AuthErrorKind::classify(status.as_u16(), www_authenticate.as_deref(), &body)
    {
        tracing::warn!(status = %status, kind = %kind, "Serving endpoint rejected credential");
        return Err(ClientError::Auth {
            kind,
            status: status.as_u16(),
            message: body,
        });
    }

    tracing::warn!(status = %status, "Serving endpoint returned an error status");
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Read the start of an error body without waiting on or buffering the rest
async fn read_error_body(mut response: Response, timeout: Duration) -> String {
    let mut bytes = Vec::new();
    let read = async {
        while bytes.len() < MAX_ERROR_BODY_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => bytes.extend_from_slice(&chunk),
                Ok(None) | Err(_) => break,
            }
        }
    };
    if tokio::time::timeout(timeout, read).await.is_err() {
        tracing::debug!(read = bytes.len(), "Error body stalled, keeping what arrived");
    }

    bytes.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&bytes)
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect()
}

/// Check that a successful response is an event stream
///
/// # Errors
///
/// Returns [`ClientError::Handshake`] when the content type is anything but
/// `text/event-stream`.
pub fn ensure_event_stream(response: &Response) -> Result<(), ClientError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type
        .to_ascii_lowercase()
        .starts_with("text/event-stream")
    {
        Ok(())
    } else {
        Err(ClientError::Handshake(format!(
            "expected text/event-stream, got '{content_type}'"
        )))
    }
}
