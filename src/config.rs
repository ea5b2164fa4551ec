//! Sandbox configuration.
//!
//! Every field has a default so a config file only needs to name what it
//! overrides:
//!
//! ```json
//! { "timeout_ms": 2000, "debounce_ms": 800 }
//! ```

use crate::error::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pinned component runtime sources.
///
/// The component language loads React and an in-browser JSX transform from
/// these URLs at render time. Point them at self-hosted copies to make
/// component previews independent of the public CDN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentRuntime {
    pub react_url: String,
    pub react_dom_url: String,
    pub babel_url: String,
}

impl Default for ComponentRuntime {
    fn default() -> Self {
        Self {
            react_url: String::from("https://unpkg.com/react@18.3.1/umd/react.development.js"),
            react_dom_url: String::from(
                "https://unpkg.com/react-dom@18.3.1/umd/react-dom.development.js",
            ),
            babel_url: String::from("https://unpkg.com/@babel/standalone@7.24.7/babel.min.js"),
        }
    }
}

/// Configuration for the preview sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum V8 heap size in bytes for headless execution (default: 64MB)
    pub max_heap_size: usize,
    /// Maximum time for one headless execution in milliseconds (default: 5000ms)
    pub timeout_ms: u64,
    /// Largest source text accepted by the synthesizer, in bytes
    pub max_code_size: usize,
    /// Quiet period after the last edit before the preview recomputes
    pub debounce_ms: u64,
    /// CSS length of the preview frame
    pub frame_height: String,
    pub component_runtime: ComponentRuntime,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_heap_size: 64 * 1024 * 1024, // 64MB default
            timeout_ms: 5_000,
            max_code_size: 256 * 1024,
            debounce_ms: 1_000,
            frame_height: String::from("300px"),
            component_runtime: ComponentRuntime::default(),
        }
    }
}

impl SandboxConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: SandboxConfig = serde_json::from_str(&text)
            .map_err(|e| SandboxError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(SandboxError::Config("timeout_ms must be greater than zero".into()));
        }
        if self.max_code_size == 0 {
            return Err(SandboxError::Config("max_code_size must be greater than zero".into()));
        }
        if !crate::sanitize::validate_css_length(&self.frame_height) {
            return Err(SandboxError::Config(format!(
                "frame_height '{}' is not a CSS length",
                self.frame_height
            )));
        }
        for url in [
            &self.component_runtime.react_url,
            &self.component_runtime.react_dom_url,
            &self.component_runtime.babel_url,
        ] {
            if !crate::sanitize::validate_url(url) {
                return Err(SandboxError::Config(format!(
                    "component runtime URL '{}' must be http or https",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SandboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.debounce(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        fs::write(&path, r#"{ "timeout_ms": 250, "frame_height": "40vh" }"#).unwrap();

        let config = SandboxConfig::from_file(&path).unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.frame_height, "40vh");
        assert_eq!(config.debounce_ms, 1_000);
        assert_eq!(config.component_runtime, ComponentRuntime::default());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        fs::write(&path, r#"{ "timeout_ms": 0 }"#).unwrap();

        let result = SandboxConfig::from_file(&path);
        assert!(result.unwrap_err().to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_rejects_non_http_runtime_url() {
        let mut config = SandboxConfig::default();
        config.component_runtime.react_url = "javascript:alert(1)".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        fs::write(&path, "{ not json").unwrap();

        let result = SandboxConfig::from_file(&path);
        assert!(matches!(result, Err(SandboxError::Config(_))));
    }
}
