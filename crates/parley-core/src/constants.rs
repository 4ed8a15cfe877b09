//! Package-level constants.

/// Current version of the Parley session layer (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "parley";

/// Prefix carried by every client-generated temporary message id.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Number of leading content characters that participate in event fingerprints.
pub const FINGERPRINT_CONTENT_PREFIX: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }

    #[test]
    fn temp_prefix_is_stable() {
        assert_eq!(TEMP_ID_PREFIX, "temp_");
    }
}
