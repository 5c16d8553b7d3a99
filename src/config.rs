use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from vigil.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct VigilConfig {
    pub monitor: MonitorConfig,
    pub locator: LocatorConfig,
    pub upload: UploadConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Executable to monitor, extension included.
    pub target_executable: String,
    /// Seconds between ticks.
    pub interval_secs: u64,
    /// Rich-presence application id. Prompted for at startup when unset.
    pub application_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Max concurrent install-root searches. Kept low on purpose: the
    /// recursive scans thrash disks when run wide open.
    pub search_concurrency: usize,
    /// Roots to search for the executable. Empty means platform defaults.
    pub search_roots: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Temp-file host base URL, no trailing slash.
    pub endpoint: String,
    pub user_agent: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Details line shown above the state text.
    pub details: String,
    /// Regex applied to the window title to extract the open-document
    /// label; the first capture group wins, the whole title is the
    /// fallback.
    pub label_pattern: String,
    pub large_image_text: String,
    pub small_image_key: String,
    pub small_image_text: String,
    pub button_label: Option<String>,
    pub button_url: Option<String>,
}

// --- Default implementations ---

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            target_executable: "CLIPStudioPaint.exe".to_string(),
            interval_secs: 10,
            application_id: Some("928158606313000961".to_string()),
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            search_concurrency: 1,
            search_roots: Vec::new(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://uguu.se".to_string(),
            user_agent: "vigil".to_string(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            details: "Drawing".to_string(),
            label_pattern: r"^(.+?)\s+-\s+.+$".to_string(),
            large_image_text: String::new(),
            small_image_key: "paint-new".to_string(),
            small_image_text: "CLIP STUDIO PAINT".to_string(),
            button_label: None,
            button_url: None,
        }
    }
}

/// Errors loading or parsing the config file.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load the config file, or fall back to defaults when it doesn't exist.
pub fn load(path: &Path) -> Result<VigilConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(VigilConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VigilConfig::default();
        assert_eq!(config.monitor.target_executable, "CLIPStudioPaint.exe");
        assert_eq!(config.monitor.interval_secs, 10);
        assert_eq!(config.locator.search_concurrency, 1);
        assert_eq!(config.upload.endpoint, "https://uguu.se");
        assert!(config.presence.button_label.is_none());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.monitor.interval_secs, 10);
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(
            &path,
            r#"
[monitor]
target_executable = "krita"
interval_secs = 30

[presence]
details = "Painting"
button_label = "Gallery"
button_url = "https://example.com/gallery"
"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.monitor.target_executable, "krita");
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.presence.details, "Painting");
        assert_eq!(config.presence.button_label.as_deref(), Some("Gallery"));
        // Untouched sections keep defaults
        assert_eq!(config.upload.endpoint, "https://uguu.se");
        assert_eq!(config.locator.search_concurrency, 1);
    }

    #[test]
    fn test_load_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "not [valid toml").unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse"));
    }
}
