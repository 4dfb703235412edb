use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chat::HistoryPolicy;

const SETTINGS_FILE_NAME: &str = "widget_settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetSettings {
    /// Prebuilt voice used for spoken replies.
    pub voice_name: String,

    /// Screen identifier used for the context hint when a session opens.
    pub screen: String,

    /// What happens to the text-chat transcript when the screen changes.
    pub history_policy: HistoryPolicy,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            voice_name: "Zephyr".to_string(),
            screen: "dashboard".to_string(),
            history_policy: HistoryPolicy::ResetOnScreenChange,
        }
    }
}

/// Read the API key from the environment.
///
/// The key is never persisted in the settings file.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE_NAME)
}

/// Load settings, falling back to defaults on any problem.
///
/// A missing file is the normal first-run case; a malformed file is logged
/// and ignored rather than blocking startup.
pub fn load_settings(config_dir: &Path) -> WidgetSettings {
    let path = settings_path(config_dir);

    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<WidgetSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                WidgetSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => WidgetSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            WidgetSettings::default()
        }
    }
}

pub fn save_settings(config_dir: &Path, settings: &WidgetSettings) -> Result<(), String> {
    let path = settings_path(config_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents a partial/corrupt settings file if the process dies mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename will atomically replace the destination. On Windows, rename
    // fails if the destination exists, so we remove it first (ignoring NotFound).
    if cfg!(windows) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(format!("Remove existing settings file {:?}: {}", path, e));
                }
            }
        }
    }

    std::fs::rename(&tmp_path, &path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings.voice_name, "Zephyr");
        assert_eq!(settings.screen, "dashboard");
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(settings_path(dir.path()), "{not json").unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings.voice_name, "Zephyr");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(settings_path(dir.path()), r#"{"screen": "orders"}"#).unwrap();
        let settings = load_settings(dir.path());
        assert_eq!(settings.screen, "orders");
        assert_eq!(settings.voice_name, "Zephyr");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let settings = WidgetSettings {
            voice_name: "Puck".to_string(),
            screen: "plans".to_string(),
            history_policy: HistoryPolicy::Preserve,
        };
        save_settings(dir.path(), &settings).unwrap();

        let loaded = load_settings(dir.path());
        assert_eq!(loaded.voice_name, "Puck");
        assert_eq!(loaded.screen, "plans");
        assert!(matches!(loaded.history_policy, HistoryPolicy::Preserve));
    }
}
