use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::paths;
use crate::error::Result;
use crate::message::MessageOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Accounts whose compiled rules stay cached.
    pub cache_capacity: usize,
    /// Charset for text parts that declare none and cannot be detected.
    pub default_charset: Option<String>,
    pub prefer_html: bool,
    pub fragment_length: usize,
    pub rules_dir: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directives, used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            default_charset: None,
            prefer_html: false,
            fragment_length: 150,
            rules_dir: None,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Like `load`, but an unreadable or malformed file also gives the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "ignoring settings: {e}");
            Self::default()
        })
    }

    /// Settings from the per-user config directory.
    pub fn load_default_location() -> Self {
        match paths::settings_path() {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn message_options(&self) -> MessageOptions {
        MessageOptions {
            default_charset: self.default_charset.clone(),
            prefer_html: self.prefer_html,
            fragment_length: self.fragment_length,
        }
    }

    pub fn rules_dir(&self) -> Option<PathBuf> {
        self.rules_dir.clone().or_else(paths::default_rules_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.cache_capacity, 1000);
        assert_eq!(settings.log_filter, "info");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");
        let settings = Settings {
            default_charset: Some("iso-8859-1".into()),
            prefer_html: true,
            rules_dir: Some(dir.path().join("rules")),
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
        assert!(settings.message_options().prefer_html);
        assert_eq!(settings.rules_dir(), Some(dir.path().join("rules")));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"fragmentLength": 80}"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.fragment_length, 80);
        assert_eq!(settings.cache_capacity, 1000);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(Error::Json(_))));
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }
}
