//! Error records and the typed causes they carry

use chrono::{DateTime, Utc};
use nbhd_common::events::{ErrorCategory, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Diagnostic fingerprint attached to a record
pub type Context = BTreeMap<String, serde_json::Value>;

/// Build a [`Context`] from `key => value` pairs
///
/// ```
/// use nbhd_resilience::context;
/// let ctx = context! { "phase" => "preflight", "canRetry" => false };
/// assert_eq!(ctx["phase"], "preflight");
/// ```
#[macro_export]
macro_rules! context {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut ctx = $crate::error_bus::Context::new();
        $( ctx.insert(($key).to_string(), ::serde_json::json!($value)); )*
        ctx
    }};
}

/// Service worker failure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwFailureKind {
    /// Runtime lacks a worker container or push manager
    Unsupported,
    /// Deployment serves an HTML fallback instead of the script
    MimeType,
    /// Platform rejected the registration
    RegistrationFailed,
    /// Script unreachable or non-2xx
    Network,
}

/// Audio failure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioFailureKind {
    /// A decoder rejected the fetched bytes
    DecodingError,
    /// No audio path on this runtime
    Unsupported,
    /// No candidate source could be fetched or loaded
    LoadFailed,
    /// Output refused a playable sound
    PlaybackFailed,
}

/// Manifest failure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestFailureKind {
    Network,
    SyntaxError,
    MissingFields,
    InvalidIcons,
}

macro_rules! wire_name {
    ($ty:ty { $($variant:ident => $name:literal),* $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(<$ty>::$variant => $name,)*
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_name!(SwFailureKind {
    Unsupported => "unsupported",
    MimeType => "mime-type",
    RegistrationFailed => "registration-failed",
    Network => "network",
});

wire_name!(AudioFailureKind {
    DecodingError => "decoding-error",
    Unsupported => "unsupported",
    LoadFailed => "load-failed",
    PlaybackFailed => "playback-failed",
});

wire_name!(ManifestFailureKind {
    Network => "network",
    SyntaxError => "syntax-error",
    MissingFields => "missing-fields",
    InvalidIcons => "invalid-icons",
});

/// The originating error of a record
///
/// Component failures carry their typed sub-cause; anything arriving from
/// the outside (global signals, host callbacks) is a named error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReportedError {
    ServiceWorker { cause: SwFailureKind, detail: String },
    Audio { cause: AudioFailureKind, detail: String },
    Manifest { cause: ManifestFailureKind, detail: String },
    /// Error with a constructor name and message (`ChunkLoadError`, `TypeError`, ...)
    Named { name: String, message: String },
}

impl ReportedError {
    pub fn service_worker(cause: SwFailureKind, detail: impl Into<String>) -> Self {
        ReportedError::ServiceWorker { cause, detail: detail.into() }
    }

    pub fn audio(cause: AudioFailureKind, detail: impl Into<String>) -> Self {
        ReportedError::Audio { cause, detail: detail.into() }
    }

    pub fn manifest(cause: ManifestFailureKind, detail: impl Into<String>) -> Self {
        ReportedError::Manifest { cause, detail: detail.into() }
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        ReportedError::Named { name: name.into(), message: message.into() }
    }

    /// Error name as the platform would print it
    pub fn name(&self) -> &str {
        match self {
            ReportedError::ServiceWorker { cause, .. } => cause.as_str(),
            ReportedError::Audio { cause, .. } => cause.as_str(),
            ReportedError::Manifest { cause, .. } => cause.as_str(),
            ReportedError::Named { name, .. } => name,
        }
    }
}

impl fmt::Display for ReportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportedError::ServiceWorker { detail, .. }
            | ReportedError::Audio { detail, .. }
            | ReportedError::Manifest { detail, .. } => write!(f, "{}: {}", self.name(), detail),
            ReportedError::Named { name, message } => write!(f, "{}: {}", name, message),
        }
    }
}

/// Immutable categorised error record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub category: ErrorCategory,
    /// `None` when the reporter had nothing to attach
    pub error: Option<ReportedError>,
    pub severity: Severity,
    pub context: Context,
    /// User-visible message
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Deduplication key for user-facing notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationKey {
    pub category: ErrorCategory,
    pub severity: Severity,
}

impl From<&ErrorRecord> for NotificationKey {
    fn from(record: &ErrorRecord) -> Self {
        Self { category: record.category, severity: record.severity }
    }
}
