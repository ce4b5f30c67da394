//! Shared path policy for the file tools.
//!
//! Blocks the sensitive locations the file tools must never touch,
//! plus `..` traversal out of whatever directory the agent was pointed
//! at.

use tidepool_core::ToolError;

/// Path prefixes the file tools refuse to touch.
const BLOCKED_PREFIXES: &[&str] = &[
    "/etc",
    "/proc",
    "/sys",
    "/boot",
    "/root/.ssh",
];

/// Path components that are blocked anywhere they appear.
const BLOCKED_COMPONENTS: &[&str] = &[".ssh", ".gnupg", ".aws"];

/// Validate a path for a file tool, rejecting traversal and sensitive
/// locations. Returns the path unchanged when acceptable.
pub fn check_path<'a>(tool_name: &str, path: &'a str) -> Result<&'a str, ToolError> {
    if path.is_empty() {
        return Err(ToolError::InvalidArguments("Empty path".into()));
    }

    if path.split(['/', '\\']).any(|c| c == "..") {
        return Err(ToolError::PermissionDenied {
            tool_name: tool_name.into(),
            reason: "Path traversal ('..') is not allowed".into(),
        });
    }

    for prefix in BLOCKED_PREFIXES {
        if path == *prefix || path.starts_with(&format!("{prefix}/")) {
            return Err(ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: format!("Access to {prefix} is blocked"),
            });
        }
    }

    for component in BLOCKED_COMPONENTS {
        if path.split(['/', '\\']).any(|c| c == *component) {
            return Err(ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: format!("Access to {component} directories is blocked"),
            });
        }
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_pass() {
        assert!(check_path("file_read", "/tmp/notes.txt").is_ok());
        assert!(check_path("file_read", "relative/file.md").is_ok());
    }

    #[test]
    fn traversal_blocked() {
        assert!(check_path("file_read", "../../etc/passwd").is_err());
        assert!(check_path("file_read", "a/../b").is_err());
    }

    #[test]
    fn sensitive_prefixes_blocked() {
        assert!(check_path("file_read", "/etc/shadow").is_err());
        assert!(check_path("file_write", "/proc/self/mem").is_err());
    }

    #[test]
    fn sensitive_components_blocked() {
        assert!(check_path("file_read", "/home/user/.ssh/id_rsa").is_err());
        assert!(check_path("file_read", "/home/user/.aws/credentials").is_err());
    }

    #[test]
    fn empty_path_rejected() {
        assert!(matches!(
            check_path("file_read", ""),
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
