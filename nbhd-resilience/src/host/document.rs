//! Document seam used by the manifest guard

/// The parts of the host document the manifest guard may touch
pub trait DocumentHost: Send + Sync {
    /// Create an in-memory object URL (`blob:`) holding `bytes`
    fn create_object_url(&self, bytes: Vec<u8>, mime_type: &str) -> String;

    /// Release an object URL created by [`DocumentHost::create_object_url`]
    fn revoke_object_url(&self, url: &str);

    /// Point `<link rel="manifest">` at `href`, inserting the element if absent
    fn set_manifest_link(&self, href: &str);

    /// Current `href` of the manifest link, if one exists
    fn manifest_link(&self) -> Option<String>;
}
