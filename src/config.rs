use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL of the fix/gen backend
    pub api_base: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Editor decoration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightSettings {
    /// Class name for lines changed by the patch
    pub changed_class: String,

    /// Class name for the line under the preview cursor
    pub hover_class: String,

    /// Scroll the first highlighted line into view
    pub reveal_first_line: bool,
}

impl Default for HighlightSettings {
    fn default() -> Self {
        Self {
            changed_class: "agent-fix-line".to_string(),
            hover_class: "agent-fix-hover-line".to_string(),
            reveal_first_line: true,
        }
    }
}

/// Patch workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Request one more fix preview when an "Apply & Run" re-run fails
    pub auto_fix_on_failed_rerun: bool,

    /// Lines of context on each side of an estimated error location
    pub estimate_context_lines: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            auto_fix_on_failed_rerun: true,
            estimate_context_lines: 6,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendSettings,
    pub highlight: HighlightSettings,
    pub workflow: WorkflowSettings,
}

impl Config {
    /// Get the config file path (~/.config/patchlens/config.toml)
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("patchlens").join("config.toml"))
    }

    /// Load configuration from file, or return default if not found
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}
