//! Error-message helpers: attach operator-facing suggestions to a failure
//! without changing its underlying cause chain.

use anyhow::Result;
use colored::Colorize;

pub trait EnhancedError<T> {
    fn context_with_help(self, msg: &str, help: &[&str]) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> EnhancedError<T> for Result<T, E> {
    fn context_with_help(self, msg: &str, help: &[&str]) -> Result<T> {
        self.map_err(|e| {
            let mut text = format!("{}\n\n{}", msg.red().bold(), e);
            if !help.is_empty() {
                text.push_str(&format!("\n\n{}", "Possible solutions:".yellow().bold()));
                for (i, h) in help.iter().enumerate() {
                    text.push_str(&format!("\n  {}. {}", i + 1, h));
                }
            }
            anyhow::anyhow!(text)
        })
    }
}

pub mod helpers {
    pub const ITEM_NOT_FOUND_HELP: &[&str] = &[
        "Check that the id is correct (try `memory-cli memory search-by-tag` or `memory-cli memory timeline`)",
        "The item may already have been deleted, archived, or superseded",
    ];

    pub const STORAGE_HELP: &[&str] = &[
        "Verify --memory-dir points at an existing, writable directory",
        "Check CLAUDE_MEMORY_DIR if no --memory-dir was passed",
    ];

    pub const RULE_NOT_ELIGIBLE_HELP: &[&str] =
        &["An insight needs importance >= 5 and confidence >= 0.8 before it can be promoted to a rule"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_with_help_lists_suggestions() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        let enhanced = result.context_with_help("Lookup failed", &["try again"]);
        let msg = enhanced.unwrap_err().to_string();
        assert!(msg.contains("Possible solutions:"));
        assert!(msg.contains("try again"));
    }
}
