//! Severity classification and user-facing messages
//!
//! Both mappings are total over `(category, Option<&ReportedError>)`.
//! Messages avoid technical vocabulary; the host shows them verbatim.

use super::record::{AudioFailureKind, ManifestFailureKind, ReportedError, SwFailureKind};
use nbhd_common::events::{ErrorCategory, Severity};

/// Error name the bundler raises when a lazily loaded chunk cannot be fetched
pub const CHUNK_LOAD_ERROR: &str = "ChunkLoadError";

pub const MSG_OFFLINE_UNAVAILABLE: &str = "Some offline features may not be available right now. \
The app will keep working while you're online.";
pub const MSG_OFFLINE_UNSUPPORTED: &str =
    "This browser doesn't support offline features. The app will keep working while you're online.";
pub const MSG_SOUNDS_REPLACED: &str =
    "Some notification sounds couldn't be loaded, so a simple tone will play instead.";
pub const MSG_SOUNDS_UNSUPPORTED: &str =
    "This browser can't play notification sounds. You'll still see notifications on screen.";
pub const MSG_SOUNDS_FAILED: &str =
    "We couldn't play notification sounds. You'll still see notifications on screen.";
pub const MSG_INSTALL_UNAVAILABLE: &str =
    "Adding this app to your home screen may not be available right now.";
pub const MSG_CONNECTION: &str =
    "We couldn't load part of the page. Please check your connection and try again.";
pub const MSG_NEW_VERSION: &str =
    "A newer version of the app is available. Please refresh the page to continue.";
pub const MSG_FALLBACK: &str = "Something went wrong. Please try again.";

/// Severity for a record
///
/// | Category & condition | Severity |
/// |---|---|
/// | service-worker: mime-type | medium |
/// | service-worker: anything else | low |
/// | audio: decoding error | medium |
/// | audio: anything else | low |
/// | manifest: syntax error | medium |
/// | manifest: anything else | low |
/// | unknown named `ChunkLoadError` | high |
/// | network | medium |
/// | anything else | medium |
pub fn classify_severity(category: ErrorCategory, error: Option<&ReportedError>) -> Severity {
    match (category, error) {
        (
            ErrorCategory::ServiceWorker,
            Some(ReportedError::ServiceWorker { cause: SwFailureKind::MimeType, .. }),
        ) => Severity::Medium,
        (ErrorCategory::ServiceWorker, _) => Severity::Low,
        (
            ErrorCategory::Audio,
            Some(ReportedError::Audio { cause: AudioFailureKind::DecodingError, .. }),
        ) => Severity::Medium,
        (ErrorCategory::Audio, _) => Severity::Low,
        (
            ErrorCategory::Manifest,
            Some(ReportedError::Manifest { cause: ManifestFailureKind::SyntaxError, .. }),
        ) => Severity::Medium,
        (ErrorCategory::Manifest, _) => Severity::Low,
        (ErrorCategory::Unknown, Some(ReportedError::Named { name, .. }))
            if name == CHUNK_LOAD_ERROR =>
        {
            Severity::High
        }
        (ErrorCategory::Network, _) | (ErrorCategory::Unknown, _) => Severity::Medium,
    }
}

/// User-visible message for a record
pub fn user_message(category: ErrorCategory, error: Option<&ReportedError>) -> &'static str {
    match (category, error) {
        (ErrorCategory::ServiceWorker, Some(ReportedError::ServiceWorker { cause, .. })) => {
            match cause {
                SwFailureKind::Unsupported => MSG_OFFLINE_UNSUPPORTED,
                SwFailureKind::MimeType
                | SwFailureKind::RegistrationFailed
                | SwFailureKind::Network => MSG_OFFLINE_UNAVAILABLE,
            }
        }
        (ErrorCategory::ServiceWorker, _) => MSG_OFFLINE_UNAVAILABLE,
        (ErrorCategory::Audio, Some(ReportedError::Audio { cause, .. })) => match cause {
            AudioFailureKind::DecodingError | AudioFailureKind::LoadFailed => MSG_SOUNDS_REPLACED,
            AudioFailureKind::Unsupported => MSG_SOUNDS_UNSUPPORTED,
            AudioFailureKind::PlaybackFailed => MSG_SOUNDS_FAILED,
        },
        (ErrorCategory::Audio, _) => MSG_SOUNDS_FAILED,
        (ErrorCategory::Manifest, _) => MSG_INSTALL_UNAVAILABLE,
        (ErrorCategory::Network, _) => MSG_CONNECTION,
        (ErrorCategory::Unknown, Some(ReportedError::Named { name, .. }))
            if name == CHUNK_LOAD_ERROR =>
        {
            MSG_NEW_VERSION
        }
        (ErrorCategory::Unknown, _) => MSG_FALLBACK,
    }
}
