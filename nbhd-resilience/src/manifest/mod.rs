//! Web app manifest validation and repair

mod descriptor;
mod guard;

pub use descriptor::{
    parse_sizes, resolve_url, DisplayMode, IconSize, ManifestDescriptor, ManifestIcon,
    PLACEHOLDER_ICON,
};
pub use guard::{is_json_mime, ManifestGuard, ManifestStatus, RepairOutcome, ValidationResult};
