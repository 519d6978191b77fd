//! Shared utility functions for dialect adapters.

use fm_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].  Both classify as retryable transport failures.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Parse a `Retry-After` header value into milliseconds.
///
/// The header is either delay-seconds (`"120"`) or an HTTP-date
/// (`"Fri, 31 Dec 1999 23:59:59 GMT"`).  A date in the past yields zero.
pub(crate) fn parse_retry_after_ms(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs.saturating_mul(1_000));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta_ms = (when.with_timezone(&chrono::Utc) - chrono::Utc::now()).num_milliseconds();
    Some(delta_ms.max(0) as u64)
}

/// Build a status error from a non-2xx provider response, capturing any
/// `Retry-After` header before the body is consumed.
pub(crate) async fn status_error(resp: reqwest::Response) -> Error {
    let code = resp.status().as_u16();
    let retry_after_ms = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after_ms);
    let message = resp.text().await.unwrap_or_default();
    Error::Status {
        code,
        message,
        retry_after_ms,
    }
}
