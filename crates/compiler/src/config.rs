//! Compiler configuration
//!
//! Carries the CLI-facing switches through the pipeline: shared-library
//! mode, `#line` emission, and the warning pass settings.

use crate::lint::WarnConfig;

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// `--shared`: emit no `main`, add a per-module init hook
    pub shared: bool,
    /// `-g`: emit `#line` directives ahead of each statement
    pub line_info: bool,
    /// `-w`: run the unused-variable warning pass
    pub warnings: bool,
    /// Settings for the warning pass
    pub warn_config: WarnConfig,
    /// Source file name, used by `#line` directives
    pub source_name: String,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_line_info(mut self, line_info: bool) -> Self {
        self.line_info = line_info;
        self
    }

    pub fn with_warnings(mut self, warnings: bool) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_warn_config(mut self, warn_config: WarnConfig) -> Self {
        self.warn_config = warn_config;
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_shared(true)
            .with_line_info(true)
            .with_warnings(true)
            .with_source_name("demo.strada");
        assert!(config.shared);
        assert!(config.line_info);
        assert!(config.warnings);
        assert_eq!(config.source_name, "demo.strada");
    }

    #[test]
    fn test_defaults_are_off() {
        let config = CompilerConfig::default();
        assert!(!config.shared);
        assert!(!config.line_info);
        assert!(!config.warnings);
    }
}
