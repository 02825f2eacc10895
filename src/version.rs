//! Build-time version information.
//!
//! The crate version comes from Cargo; the git and build fields are read
//! from `FOUNDATION_GIT_COMMIT`, `FOUNDATION_GIT_TREE_STATE` and
//! `FOUNDATION_BUILD_DATE` at compile time and are empty when unset.

use serde::Serialize;

/// Version and build information of the running binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub git_tree_state: &'static str,
    pub build_date: &'static str,
}

/// Version information baked in at compile time.
pub fn get() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_commit: option_env!("FOUNDATION_GIT_COMMIT").unwrap_or(""),
        git_tree_state: option_env!("FOUNDATION_GIT_TREE_STATE").unwrap_or(""),
        build_date: option_env!("FOUNDATION_BUILD_DATE").unwrap_or(""),
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Version {{ version: {}, gitCommit: {}, gitTree: {}, buildDate: {} }}",
            self.version, self.git_commit, self.git_tree_state, self.build_date
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VersionInfo {
        VersionInfo {
            version: "1.2.3",
            git_commit: "abc123",
            git_tree_state: "clean",
            build_date: "2024-01-01T00:00:00Z",
        }
    }

    #[test]
    fn reports_crate_version() {
        assert_eq!(get().version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn display_format() {
        assert_eq!(
            sample().to_string(),
            "Version { version: 1.2.3, gitCommit: abc123, gitTree: clean, buildDate: 2024-01-01T00:00:00Z }"
        );
    }

    #[test]
    fn json_uses_snake_case_keys() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "version": "1.2.3",
                "git_commit": "abc123",
                "git_tree_state": "clean",
                "build_date": "2024-01-01T00:00:00Z",
            })
        );
    }
}
