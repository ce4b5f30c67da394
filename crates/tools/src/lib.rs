//! Built-in tool implementations for Tidepool.
//!
//! Tools give the agent the ability to interact with the world:
//! run shell commands, read/write/list/delete files, search the web,
//! and check the weather.

pub mod file_delete;
pub mod file_list;
pub mod file_read;
pub mod file_write;
pub mod paths;
pub mod sample;
pub mod shell;
pub mod weather_lookup;
pub mod web_search;

use tidepool_core::ToolRegistry;

/// Create a default tool registry with all built-in tools.
///
/// Security defaults:
/// - Shell: only common safe commands (ls, cat, echo, git, pwd, etc.)
/// - File read/write/delete: sensitive paths (~/.ssh, /etc, etc.) are blocked
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let safe_commands = vec![
        "ls".into(),
        "cat".into(),
        "head".into(),
        "tail".into(),
        "echo".into(),
        "pwd".into(),
        "date".into(),
        "whoami".into(),
        "wc".into(),
        "grep".into(),
        "find".into(),
        "which".into(),
        "git".into(),
        "cargo".into(),
    ];
    registry.register(Box::new(shell::ShellTool::new(safe_commands)));
    registry.register(Box::new(file_read::FileReadTool::new()));
    registry.register(Box::new(file_write::FileWriteTool::new()));
    registry.register(Box::new(file_list::FileListTool::new()));
    registry.register(Box::new(file_delete::FileDeleteTool::new()));
    registry.register(Box::new(web_search::WebSearchTool));
    registry.register(Box::new(weather_lookup::WeatherLookupTool));
    registry.register(Box::new(sample::SampleTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_tools() {
        let registry = default_registry();
        for name in [
            "shell",
            "file_read",
            "file_write",
            "file_list",
            "file_delete",
            "web_search",
            "weather_lookup",
            "sample",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
    }
}
