//! Plugin validation seam consulted by `install_plugin`/`upgrade_plugin`/
//! `inspect_plugin_archive`.
//!
//! Archive packaging, signing, and the allowlist policy itself are out of
//! scope ("the core only consults a validator"); this module defines the
//! seam the Orchestrator Core calls through, plus a minimal allowlist
//! implementation suitable for local development and tests.

use std::collections::HashSet;

/// Outcome of validating a candidate plugin archive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Seam the orchestrator consults before installing or upgrading a plugin.
pub trait PluginValidator: Send + Sync {
    /// Validate a candidate archive path, returning whether installation
    /// may proceed.
    fn validate(&self, archive_path: &str) -> ValidationResult;
}

/// Validator that allows archives whose file extension is in a fixed
/// allowlist. Stands in for the real signing/allowlist policy, which is a
/// collaborator this crate does not implement.
pub struct ExtensionAllowlistValidator {
    allowed_extensions: HashSet<String>,
}

impl ExtensionAllowlistValidator {
    /// Construct a validator accepting the given (lowercase, no-dot)
    /// extensions, e.g. `["zip", "tar.gz"]`.
    #[must_use]
    pub fn new(allowed_extensions: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_extensions: allowed_extensions.into_iter().collect(),
        }
    }
}

impl Default for ExtensionAllowlistValidator {
    fn default() -> Self {
        Self::new(["zip".to_owned()])
    }
}

impl PluginValidator for ExtensionAllowlistValidator {
    fn validate(&self, archive_path: &str) -> ValidationResult {
        let ext = std::path::Path::new(archive_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match ext {
            Some(ext) if self.allowed_extensions.contains(&ext) => ValidationResult {
                allowed: true,
                reason: None,
            },
            Some(ext) => ValidationResult {
                allowed: false,
                reason: Some(format!("extension '{ext}' is not in the allowlist")),
            },
            None => ValidationResult {
                allowed: false,
                reason: Some("archive path has no extension".into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowlisted_extension() {
        let validator = ExtensionAllowlistValidator::default();
        let result = validator.validate("/tmp/folderwatch.zip");
        assert!(result.allowed);
    }

    #[test]
    fn rejects_other_extensions() {
        let validator = ExtensionAllowlistValidator::default();
        let result = validator.validate("/tmp/folderwatch.exe");
        assert!(!result.allowed);
        assert!(result.reason.is_some());
    }
}
