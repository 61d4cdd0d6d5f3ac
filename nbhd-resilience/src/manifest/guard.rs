//! Manifest guard
//!
//! Validation runs five checks in order and stops at the first failure:
//!
//! 1. fetch (non-2xx or transport error: `network`)
//! 2. content type (non-JSON types are flagged, parsing continues)
//! 3. JSON parse (`syntax-error`, also for JSON that is not an object)
//! 4. required members (`missing-fields`)
//! 5. icons, probed with `HEAD` in declared order (`invalid-icons`)
//!
//! Repair swaps the live `<link rel="manifest">` for an in-memory copy of a
//! descriptor that satisfies every check.

use super::descriptor::{resolve_url, ManifestDescriptor, ManifestIcon};
use crate::context;
use crate::error_bus::{ErrorBus, ManifestFailureKind, ReportedError};
use crate::host::{DocumentHost, FetchRequest, HttpFetcher};
use chrono::{DateTime, Utc};
use nbhd_common::config::ManifestConfig;
use nbhd_common::events::{ErrorCategory, ResilienceEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Media type of the injected fallback
pub const MANIFEST_MIME_TYPE: &str = "application/manifest+json";

/// Outcome of one validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub manifest_url: String,
    pub is_valid: bool,
    pub error_type: Option<ManifestFailureKind>,
    /// Required members absent or unusable
    pub missing_fields: Vec<String>,
    /// Served with a non-JSON content type
    pub content_type_flagged: bool,
    /// First icon that passed, with its `src` resolved
    pub valid_icon: Option<ManifestIcon>,
    /// `start_url` resolved against the manifest URL
    pub resolved_start_url: Option<String>,
    /// Parsed manifest with fallbacks for missing members
    pub descriptor: Option<ManifestDescriptor>,
    pub details: Option<String>,
}

impl ValidationResult {
    fn new(manifest_url: &str) -> Self {
        Self {
            manifest_url: manifest_url.to_string(),
            is_valid: false,
            error_type: None,
            missing_fields: Vec::new(),
            content_type_flagged: false,
            valid_icon: None,
            resolved_start_url: None,
            descriptor: None,
            details: None,
        }
    }

    fn fail(mut self, kind: ManifestFailureKind, details: impl Into<String>) -> Self {
        self.is_valid = false;
        self.error_type = Some(kind);
        self.details = Some(details.into());
        self
    }
}

/// Result of [`ManifestGuard::repair`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    /// Object URL now referenced by the manifest link
    pub href: String,
    pub descriptor: ManifestDescriptor,
}

/// Snapshot returned by [`ManifestGuard::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStatus {
    pub validated: bool,
    pub last_result: Option<ValidationResult>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Object URL of the injected fallback, if repaired
    pub repaired_href: Option<String>,
}

#[derive(Default)]
struct GuardState {
    last_result: Option<ValidationResult>,
    last_timestamp: Option<DateTime<Utc>>,
    injected: Option<String>,
}

/// `true` for `application/json`, `text/json` and any `+json` type
pub fn is_json_mime(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    mime == "application/json" || mime == "text/json" || mime.ends_with("+json")
}

pub struct ManifestGuard {
    fetcher: Arc<dyn HttpFetcher>,
    document: Arc<dyn DocumentHost>,
    bus: Arc<ErrorBus>,
    config: ManifestConfig,
    state: Mutex<GuardState>,
}

impl ManifestGuard {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        document: Arc<dyn DocumentHost>,
        bus: Arc<ErrorBus>,
        config: ManifestConfig,
    ) -> Self {
        Self { fetcher, document, bus, config, state: Mutex::new(GuardState::default()) }
    }

    /// Validate the configured manifest
    pub async fn validate(&self) -> ValidationResult {
        let url = self.config.manifest_path.clone();
        self.validate_url(&url).await
    }

    /// Fetch and check `manifest_url`; failures are reported
    ///
    /// Re-fetches on every call.
    pub async fn validate_url(&self, manifest_url: &str) -> ValidationResult {
        let result = self.evaluate(manifest_url).await;

        match (&result.error_type, &result.details) {
            (Some(kind), details) => {
                let details = details.clone().unwrap_or_default();
                warn!(url = manifest_url, error = %kind, "Manifest failed validation: {}", details);
                let mut ctx = context! {
                    "subCause" => kind,
                    "url" => manifest_url,
                    "details" => details.clone(),
                    "contentTypeFlagged" => result.content_type_flagged,
                };
                if !result.missing_fields.is_empty() {
                    ctx.insert("missingFields".into(), serde_json::json!(result.missing_fields));
                }
                self.bus.report(
                    ErrorCategory::Manifest,
                    Some(ReportedError::manifest(*kind, details)),
                    Some(ctx),
                );
            }
            (None, _) => info!(
                url = manifest_url,
                flagged = result.content_type_flagged,
                "Manifest validated"
            ),
        }

        let mut state = self.state.lock().unwrap();
        state.last_result = Some(result.clone());
        state.last_timestamp = Some(nbhd_common::time::now());
        result
    }

    async fn evaluate(&self, manifest_url: &str) -> ValidationResult {
        let mut result = ValidationResult::new(manifest_url);

        let response = match self.fetcher.fetch(FetchRequest::get(manifest_url)).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                return result.fail(
                    ManifestFailureKind::Network,
                    format!("Manifest request returned HTTP {}", response.status),
                )
            }
            Err(e) => return result.fail(ManifestFailureKind::Network, e.to_string()),
        };

        result.content_type_flagged = !response.mime_type().is_some_and(|m| is_json_mime(&m));
        if result.content_type_flagged {
            debug!(
                url = manifest_url,
                content_type = ?response.content_type,
                "Manifest served with a non-JSON content type"
            );
        }

        let value: Value = match serde_json::from_slice(&response.body) {
            Ok(value) => value,
            Err(e) => return result.fail(ManifestFailureKind::SyntaxError, e.to_string()),
        };
        let Some(object) = value.as_object() else {
            return result.fail(ManifestFailureKind::SyntaxError, "Manifest is not a JSON object");
        };

        let (descriptor, missing) = ManifestDescriptor::from_object(object);
        result.resolved_start_url = resolve_url(manifest_url, &descriptor.start_url);
        result.descriptor = Some(descriptor.clone());

        if !missing.is_empty() {
            let details = format!("Missing required members: {}", missing.join(", "));
            result.missing_fields = missing;
            return result.fail(ManifestFailureKind::MissingFields, details);
        }

        match self.first_valid_icon(manifest_url, &descriptor.icons).await {
            Some(icon) => {
                result.valid_icon = Some(icon);
                result.is_valid = true;
                result
            }
            None => result.fail(
                ManifestFailureKind::InvalidIcons,
                format!(
                    "No reachable icon of at least {0}x{0}",
                    self.config.min_icon_dimension
                ),
            ),
        }
    }

    /// First icon that is large enough, resolvable, and reachable
    async fn first_valid_icon(
        &self,
        manifest_url: &str,
        icons: &[ManifestIcon],
    ) -> Option<ManifestIcon> {
        let min = self.config.min_icon_dimension;

        for icon in icons {
            if !icon.meets_dimension(min) {
                debug!(src = %icon.src, sizes = ?icon.sizes, "Icon below minimum size");
                continue;
            }
            let Some(src) = resolve_url(manifest_url, &icon.src) else {
                debug!(src = %icon.src, "Icon source does not resolve");
                continue;
            };

            if src.starts_with("data:") {
                return Some(ManifestIcon { src, ..icon.clone() });
            }

            match self.fetcher.fetch(FetchRequest::head(src.as_str())).await {
                Ok(response) if response.is_success() => {
                    return Some(ManifestIcon { src, ..icon.clone() });
                }
                Ok(response) => debug!(src = %src, status = response.status, "Icon unreachable"),
                Err(e) => debug!(src = %src, error = %e, "Icon unreachable"),
            }
        }
        None
    }

    /// Point the manifest link at an in-memory fallback
    ///
    /// The fallback keeps the identity members of the last validated
    /// manifest (missing ones already replaced with defaults) and swaps in
    /// the placeholder icon when no deployed icon passed. Without a parsed
    /// manifest the stock fallback is used. Any previously injected object
    /// URL is revoked.
    pub fn repair(&self) -> nbhd_common::Result<RepairOutcome> {
        let last = self.state.lock().unwrap().last_result.clone();

        let descriptor = match last {
            Some(ValidationResult { descriptor: Some(mut descriptor), valid_icon, .. }) => {
                descriptor.icons = match valid_icon {
                    Some(icon) => vec![icon],
                    None => vec![ManifestIcon::placeholder()],
                };
                descriptor
            }
            _ => ManifestDescriptor::fallback(),
        };

        let bytes = serde_json::to_vec(&descriptor)?;
        let href = self.document.create_object_url(bytes, MANIFEST_MIME_TYPE);

        let previous = self.state.lock().unwrap().injected.replace(href.clone());
        if let Some(previous) = previous {
            self.document.revoke_object_url(&previous);
        }
        self.document.set_manifest_link(&href);

        info!(href = %href, name = %descriptor.name, "Manifest link replaced with fallback");
        self.bus.events().emit_lossy(ResilienceEvent::ManifestRepaired {
            href: href.clone(),
            timestamp: nbhd_common::time::now(),
        });

        Ok(RepairOutcome { href, descriptor })
    }

    /// Validate, repairing when validation fails
    pub async fn validate_or_repair(&self) -> (ValidationResult, Option<RepairOutcome>) {
        let result = self.validate().await;
        if result.is_valid {
            return (result, None);
        }
        match self.repair() {
            Ok(outcome) => (result, Some(outcome)),
            Err(e) => {
                warn!(error = %e, "Manifest repair failed");
                (result, None)
            }
        }
    }

    pub fn status(&self) -> ManifestStatus {
        let state = self.state.lock().unwrap();
        ManifestStatus {
            validated: state.last_result.is_some(),
            last_result: state.last_result.clone(),
            last_timestamp: state.last_timestamp,
            repaired_href: state.injected.clone(),
        }
    }
}
