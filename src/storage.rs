use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::Credentials;

const SETTINGS_FILE: &str = "settings.json";
const SESSION_DIR: &str = "session";

/// Locally persisted state: provider credentials and the user's note.
/// Everything else in the workflow is session-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate_api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_note: Option<String>,
}

pub struct SettingsStore {
    home: PathBuf,
}

impl SettingsStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        SettingsStore { home: home.into() }
    }

    fn settings_path(&self) -> PathBuf {
        self.home.join(SETTINGS_FILE)
    }

    /// Directory for transient media (prepared upload, enhanced image,
    /// downloaded video). Emptied on reset.
    pub fn session_dir(&self) -> PathBuf {
        self.home.join(SESSION_DIR)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.session_dir())
            .with_context(|| format!("Failed to create {}", self.session_dir().display()))
    }

    pub fn load(&self) -> Settings {
        let path = self.settings_path();
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<Settings>(&raw).map_err(Into::into))
        {
            Ok(settings) => settings,
            Err(err) => {
                info!("Ignoring unreadable settings at {}: {err}", path.display());
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        fs::create_dir_all(&self.home)
            .with_context(|| format!("Failed to create {}", self.home.display()))?;
        let raw = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(), raw)
            .with_context(|| format!("Failed to write {}", self.settings_path().display()))
    }

    pub fn set_credential(&self, provider: &str, key: &str) -> Result<()> {
        let mut settings = self.load();
        match provider {
            "gemini" => settings.gemini_api_key = Some(key.to_string()),
            "replicate" => settings.replicate_api_token = Some(key.to_string()),
            other => anyhow::bail!("Unknown provider '{other}' (expected gemini or replicate)"),
        }
        self.save(&settings)
    }

    pub fn set_note(&self, note: Option<&str>) -> Result<()> {
        let mut settings = self.load();
        settings.user_note = note.map(|n| n.to_string());
        self.save(&settings)
    }

    /// Settings-file credentials, falling back to the environment.
    pub fn resolve_credentials(&self) -> Credentials {
        let settings = self.load();
        Credentials {
            gemini_api_key: non_empty(settings.gemini_api_key)
                .or_else(|| non_empty(std::env::var("GEMINI_API_KEY").ok())),
            replicate_api_token: non_empty(settings.replicate_api_token)
                .or_else(|| non_empty(std::env::var("REPLICATE_API_TOKEN").ok())),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn unique_session_file(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    dir.join(format!("{stem}-{stamp}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> SettingsStore {
        let dir = std::env::temp_dir().join(format!("relive-test-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        SettingsStore::new(dir)
    }

    #[test]
    fn save_and_load_round_trip() {
        let store = temp_store("roundtrip");
        store.set_credential("gemini", "g-key").unwrap();
        store.set_credential("replicate", "r-token").unwrap();
        store.set_note(Some("a summer evening")).unwrap();

        let settings = store.load();
        assert_eq!(settings.gemini_api_key.as_deref(), Some("g-key"));
        assert_eq!(settings.replicate_api_token.as_deref(), Some("r-token"));
        assert_eq!(settings.user_note.as_deref(), Some("a summer evening"));
        let _ = fs::remove_dir_all(&store.home);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = temp_store("missing");
        let settings = store.load();
        assert!(settings.gemini_api_key.is_none());
        assert!(settings.user_note.is_none());
    }

    #[test]
    fn rejects_unknown_provider() {
        let store = temp_store("unknown");
        assert!(store.set_credential("openai", "key").is_err());
    }
}
