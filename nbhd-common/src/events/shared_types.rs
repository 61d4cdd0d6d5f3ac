//! Supporting types carried by resilience events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error category for every record submitted to the error bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Background worker validation, registration, or lifecycle failure
    ServiceWorker,
    /// Notification sound loading, decoding, or playback failure
    Audio,
    /// Web app manifest fetch or validation failure
    Manifest,
    /// Resource could not be fetched
    Network,
    /// Anything not attributable to one of the above
    Unknown,
}

impl ErrorCategory {
    /// All categories, in declaration order
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::ServiceWorker,
        ErrorCategory::Audio,
        ErrorCategory::Manifest,
        ErrorCategory::Network,
        ErrorCategory::Unknown,
    ];

    /// Wire name (`service-worker`, `audio`, ...)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ServiceWorker => "service-worker",
            ErrorCategory::Audio => "audio",
            ErrorCategory::Manifest => "manifest",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown error category: {}", s))
    }
}

/// Severity of an error record
///
/// Ordered: `Low < Medium < High < Critical`. Only `Medium` and above
/// produce a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, lowest first
    pub const ALL: [Severity; 4] =
        [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Whether a record of this severity should surface to the user
    pub fn is_user_visible(&self) -> bool {
        *self >= Severity::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of the `production-error` notification
///
/// Serialized as `{type, severity, message, timestamp}` for the host UI toast layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionErrorNotice {
    /// Error category
    #[serde(rename = "type")]
    pub category: ErrorCategory,
    pub severity: Severity,
    /// Human-readable message, free of technical jargon
    pub message: String,
    /// ISO-8601 timestamp of the record that triggered the notification
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Registration identity carried by `sw-update-available`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistrationInfo {
    /// Host-assigned registration id
    pub id: u64,
    /// Registration scope
    pub scope: String,
    /// Script URL the registration was created with
    pub script_url: String,
}
