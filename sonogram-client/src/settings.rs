//! Persistent client settings (JSON file in the user data directory).
//!
//! Every field is optional in the file; command-line flags and
//! `SONOGRAM_PORT` take precedence over what is stored here.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ClientSettings {
    pub host: String,
    pub port: Option<u16>,
    pub tls: bool,
    pub pipe: Option<PathBuf>,
    /// Grammar language requested from the server.
    pub grammar: String,
    pub identify: bool,
    pub grammar_timeout_secs: u64,
    pub connect_retries: u32,
    pub stop_phrase: String,
    pub dictation_action: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: None,
            tls: false,
            pipe: None,
            grammar: "default".into(),
            identify: false,
            grammar_timeout_secs: 10,
            connect_retries: 1,
            stop_phrase: "q k".into(),
            dictation_action: "insert".into(),
        }
    }
}

impl ClientSettings {
    pub fn normalize(&mut self) {
        self.host = non_empty_or(&self.host, "localhost");
        self.port = self.port.filter(|p| *p != 0);
        self.pipe = self
            .pipe
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.grammar = non_empty_or(&self.grammar, "default");
        self.grammar_timeout_secs = self.grammar_timeout_secs.clamp(1, 300);
        self.connect_retries = self.connect_retries.clamp(1, 100);
        self.stop_phrase = normalize_phrase(&self.stop_phrase, "q k");
        self.dictation_action = non_empty_or(&self.dictation_action, "insert");
    }
}

fn non_empty_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

/// Lowercase, single-spaced.
fn normalize_phrase(raw: &str, fallback: &str) -> String {
    let phrase = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    if phrase.is_empty() {
        fallback.into()
    } else {
        phrase
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Sonogram")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("sonogram")
            .join("settings.json")
    }
}

/// Read settings from `path`. A missing file gives the defaults; an
/// unreadable or malformed one is reported and also gives the defaults.
pub fn load_settings(path: &Path) -> ClientSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<ClientSettings>(&raw).unwrap_or_else(|e| {
            warn!("ignoring malformed settings file {}: {e}", path.display());
            ClientSettings::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientSettings::default(),
        Err(e) => {
            warn!("cannot read settings file {}: {e}", path.display());
            ClientSettings::default()
        }
    };
    settings.normalize();
    settings
}
