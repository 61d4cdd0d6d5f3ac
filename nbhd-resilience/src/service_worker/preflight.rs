//! Script pre-flight validation
//!
//! Catches the most common deployment fault before the platform sees it: a
//! single-page-app fallback route answering the worker script URL with the
//! HTML shell.

use crate::error_bus::SwFailureKind;
use crate::host::{FetchRequest, HttpFetcher};
use thiserror::Error;
use tracing::debug;

/// Content types the platform accepts for a worker script
pub const JAVASCRIPT_MIME_TYPES: [&str; 4] = [
    "application/javascript",
    "application/x-javascript",
    "text/javascript",
    "text/x-javascript",
];

/// Leading bytes inspected when sniffing for an HTML document
const SNIFF_LEN: usize = 512;

/// Pre-flight rejection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {details}")]
pub struct PreflightFailure {
    /// `Network` or `MimeType`
    pub kind: SwFailureKind,
    pub details: String,
}

impl PreflightFailure {
    fn network(details: impl Into<String>) -> Self {
        Self { kind: SwFailureKind::Network, details: details.into() }
    }
}

/// `true` when `mime` (already lower-cased, without parameters) is a script type
pub fn is_javascript_mime(mime: &str) -> bool {
    JAVASCRIPT_MIME_TYPES.iter().any(|js| js.eq_ignore_ascii_case(mime))
}

/// `true` when `body` starts with an HTML doctype or `<html` tag
///
/// Leading whitespace and a UTF-8 byte order mark are skipped; the match is
/// case-insensitive.
pub fn looks_like_html(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(SNIFF_LEN)]);
    let trimmed = head.trim_start_matches(|c: char| c == '\u{feff}' || c.is_whitespace());
    let lower = trimmed.to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html")
}

/// Validate that `script_url` serves JavaScript
///
/// 1. `HEAD` with caching disabled; a transport error or non-2xx status is a
///    network failure.
/// 2. A missing or JavaScript content type passes.
/// 3. Any other content type triggers a `GET`; a body that is an HTML
///    document is a mime-type failure. Other bodies pass and are left to the
///    platform to judge.
pub async fn preflight(
    fetcher: &dyn HttpFetcher,
    script_url: &str,
) -> Result<(), PreflightFailure> {
    let head = fetcher
        .fetch(FetchRequest::head(script_url).no_store())
        .await
        .map_err(|e| PreflightFailure::network(e.to_string()))?;

    if !head.is_success() {
        return Err(PreflightFailure::network(format!(
            "Script request returned HTTP {}",
            head.status
        )));
    }

    let mime = match head.mime_type() {
        None => {
            debug!(url = script_url, "Script has no content type; skipping body check");
            return Ok(());
        }
        Some(mime) if is_javascript_mime(&mime) => return Ok(()),
        Some(mime) => mime,
    };

    debug!(
        url = script_url,
        content_type = %mime,
        "Script has non-JavaScript content type; inspecting body"
    );

    let full = fetcher
        .fetch(FetchRequest::get(script_url).no_store())
        .await
        .map_err(|e| PreflightFailure::network(e.to_string()))?;

    if !full.is_success() {
        return Err(PreflightFailure::network(format!(
            "Script request returned HTTP {}",
            full.status
        )));
    }

    if looks_like_html(&full.body) {
        return Err(PreflightFailure {
            kind: SwFailureKind::MimeType,
            details: format!(
                "Script is served as {} and contains an HTML document instead of JavaScript",
                mime
            ),
        });
    }

    Ok(())
}
