//! Web app manifest model
//!
//! Only the members the guard validates or repairs are typed; everything
//! else in a deployed manifest is ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use url::{Position, Url};

/// 192×192 neutral square used when no deployed icon is usable
pub const PLACEHOLDER_ICON: &str = "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' \
width='192' height='192' viewBox='0 0 192 192'%3E%3Crect width='192' height='192' rx='32' \
fill='%23455a64'/%3E%3C/svg%3E";

/// Origin standing in for the document when resolving relative URLs
const DOCUMENT_ORIGIN: &str = "http://document.invalid/";

/// `display` member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    Fullscreen,
    Standalone,
    MinimalUi,
    Browser,
}

impl DisplayMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fullscreen" => Some(DisplayMode::Fullscreen),
            "standalone" => Some(DisplayMode::Standalone),
            "minimal-ui" => Some(DisplayMode::MinimalUi),
            "browser" => Some(DisplayMode::Browser),
            _ => None,
        }
    }
}

/// One entry of a `sizes` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconSize {
    /// Scalable (`any`)
    Any,
    Fixed { width: u32, height: u32 },
}

impl IconSize {
    /// Whether this size covers a `min`×`min` square
    pub fn covers(&self, min: u32) -> bool {
        match self {
            IconSize::Any => true,
            IconSize::Fixed { width, height } => *width >= min && *height >= min,
        }
    }
}

impl fmt::Display for IconSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IconSize::Any => f.write_str("any"),
            IconSize::Fixed { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

/// Parse a space-separated `sizes` list (`"48x48 192x192"`, `"any"`)
///
/// Malformed tokens are skipped.
pub fn parse_sizes(sizes: &str) -> Vec<IconSize> {
    sizes
        .split_ascii_whitespace()
        .filter_map(|token| {
            if token.eq_ignore_ascii_case("any") {
                return Some(IconSize::Any);
            }
            let (w, h) = token.split_once(['x', 'X'])?;
            Some(IconSize::Fixed { width: w.parse().ok()?, height: h.parse().ok()? })
        })
        .collect()
}

/// `icons` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIcon {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizes: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl ManifestIcon {
    pub fn placeholder() -> Self {
        Self {
            src: PLACEHOLDER_ICON.to_string(),
            sizes: Some("192x192".to_string()),
            mime_type: Some("image/svg+xml".to_string()),
            purpose: Some("any".to_string()),
        }
    }

    /// Declared sizes; an icon without `sizes` declares none
    pub fn declared_sizes(&self) -> Vec<IconSize> {
        self.sizes.as_deref().map(parse_sizes).unwrap_or_default()
    }

    /// At least one declared size covers `min`×`min`
    pub fn meets_dimension(&self, min: u32) -> bool {
        self.declared_sizes().iter().any(|size| size.covers(min))
    }
}

/// Typed manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDescriptor {
    pub name: String,
    pub short_name: String,
    pub start_url: String,
    pub display: DisplayMode,
    pub icons: Vec<ManifestIcon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
}

impl ManifestDescriptor {
    /// Stable stand-in manifest
    pub fn fallback() -> Self {
        Self {
            name: "Application".to_string(),
            short_name: "App".to_string(),
            start_url: "/".to_string(),
            display: DisplayMode::Standalone,
            icons: vec![ManifestIcon::placeholder()],
            scope: None,
            description: None,
            theme_color: Some("#455a64".to_string()),
            background_color: Some("#ffffff".to_string()),
            orientation: None,
        }
    }

    /// Build a descriptor from a parsed manifest object
    ///
    /// Returns the descriptor, with fallback values substituted for absent
    /// or unusable required members, and the names of those members.
    pub fn from_object(object: &Map<String, Value>) -> (Self, Vec<String>) {
        let fallback = Self::fallback();
        let mut missing = Vec::new();

        let mut text = |key: &str| -> Option<String> {
            let value = object
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            if value.is_none() {
                missing.push(key.to_string());
            }
            value
        };

        let name = text("name").unwrap_or(fallback.name);
        let short_name = text("short_name").unwrap_or(fallback.short_name);
        let start_url = text("start_url").unwrap_or(fallback.start_url);

        let display = object
            .get("display")
            .and_then(Value::as_str)
            .and_then(DisplayMode::parse);
        let display = match display {
            Some(display) => display,
            None => {
                missing.push("display".to_string());
                fallback.display
            }
        };

        let icons: Vec<ManifestIcon> = object
            .get("icons")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| serde_json::from_value::<ManifestIcon>(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let icons = if icons.is_empty() {
            missing.push("icons".to_string());
            fallback.icons
        } else {
            icons
        };

        let optional = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        let descriptor = Self {
            name,
            short_name,
            start_url,
            display,
            icons,
            scope: optional("scope"),
            description: optional("description"),
            theme_color: optional("theme_color"),
            background_color: optional("background_color"),
            orientation: optional("orientation"),
        };
        (descriptor, missing)
    }
}

/// Resolve `reference` against `base` the way the document would
///
/// `base` may itself be relative to the document; results on the document's
/// own origin are returned origin-relative (`/icons/a.png`). `None` when
/// either URL cannot be parsed.
pub fn resolve_url(base: &str, reference: &str) -> Option<String> {
    let origin = Url::parse(DOCUMENT_ORIGIN).ok()?;
    let base = origin.join(base).ok()?;
    let resolved = base.join(reference).ok()?;

    if resolved.origin() == origin.origin() {
        Some(resolved[Position::BeforePath..].to_string())
    } else {
        Some(resolved.to_string())
    }
}
