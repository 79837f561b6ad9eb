//! Protocol version negotiation between the orchestrator and the remote
//! agent it launches over SSH.

use serde::{Deserialize, Serialize};

/// Protocol version information.
///
/// Contains version information for compatibility checking between
/// `xddmcp` and `xddmcp-agent`. The semantic version is used for
/// compatibility checks, while git information provides additional
/// debugging context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Semantic version from Cargo.toml (e.g., "0.1.0").
    pub semantic: String,

    /// Git describe output (e.g., "v0.1.0-7-g644da27"), when built from git.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_describe: Option<String>,

    /// Full git commit hash, when built from git.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
}

impl ProtocolVersion {
    /// Get the current protocol version, reading build-time environment
    /// variables set by `build.rs`.
    pub fn current() -> Self {
        Self {
            semantic: env!("CARGO_PKG_VERSION").to_string(),
            git_describe: option_env!("XDDMCP_GIT_DESCRIBE").map(String::from),
            git_hash: option_env!("XDDMCP_GIT_HASH").map(String::from),
        }
    }

    /// Check if this version is compatible with another.
    ///
    /// Implements exact semantic-version matching, matching
    /// `TransferManager.performPostCreateChecks`'s equality check between
    /// every endpoint's reported protocol version.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.semantic == other.semantic
    }

    /// Human-readable version string, including git describe info if present.
    pub fn display(&self) -> String {
        if let Some(ref git_describe) = self.git_describe {
            format!("{} ({})", self.semantic, git_describe)
        } else {
            self.semantic.clone()
        }
    }

    /// Serialize to a JSON string, for embedding in RPC messages.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| anyhow::anyhow!("failed to serialize version: {:#}", e))
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("failed to parse version JSON: {:#}", e))
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_compatibility() {
        let v1 = ProtocolVersion {
            semantic: "0.1.0".to_string(),
            git_describe: None,
            git_hash: None,
        };
        let v2 = ProtocolVersion {
            semantic: "0.1.0".to_string(),
            git_describe: Some("v0.0.9-7-g644da27".to_string()),
            git_hash: Some("644da27".to_string()),
        };
        let v3 = ProtocolVersion {
            semantic: "0.2.0".to_string(),
            git_describe: None,
            git_hash: None,
        };
        assert!(v1.is_compatible_with(&v2));
        assert!(v2.is_compatible_with(&v1));
        assert!(!v1.is_compatible_with(&v3));
    }

    #[test]
    fn display_with_and_without_git_info() {
        let v1 = ProtocolVersion {
            semantic: "0.1.0".to_string(),
            git_describe: None,
            git_hash: None,
        };
        assert_eq!(v1.display(), "0.1.0");

        let v2 = ProtocolVersion {
            semantic: "0.1.0".to_string(),
            git_describe: Some("v0.0.9-7-g644da27".to_string()),
            git_hash: None,
        };
        assert_eq!(v2.display(), "0.1.0 (v0.0.9-7-g644da27)");
    }

    #[test]
    fn json_roundtrip() {
        let v = ProtocolVersion {
            semantic: "0.1.0".to_string(),
            git_describe: Some("v0.0.9-7-g644da27".to_string()),
            git_hash: Some("644da27abc".to_string()),
        };
        let json = v.to_json().unwrap();
        let parsed = ProtocolVersion::from_json(&json).unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn json_deserialization_without_git_info() {
        let json = r#"{"semantic":"0.1.0"}"#;
        let v = ProtocolVersion::from_json(json).unwrap();
        assert_eq!(v.semantic, "0.1.0");
        assert!(v.git_describe.is_none());
        assert!(v.git_hash.is_none());
    }
}
