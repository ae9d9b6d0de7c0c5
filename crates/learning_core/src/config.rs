use std::{collections::HashMap, fs, time::Duration};

pub const SETTINGS_FILE: &str = "learning.toml";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Pause between consecutive background module generations.
    pub prefetch_delay: Duration,
    pub history_limit: usize,
    pub event_capacity: usize,
    pub collaborator_url: String,
    pub database_url: String,
    pub request_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            prefetch_delay: Duration::from_secs(5),
            history_limit: 10,
            event_capacity: 1024,
            collaborator_url: "http://127.0.0.1:8787".into(),
            database_url: "sqlite://./data/learning.db".into(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub fn load_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file_settings(&mut settings, &file_cfg);
        }
    }

    apply_env_settings(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub(crate) fn apply_file_settings(settings: &mut EngineSettings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("collaborator_url") {
        settings.collaborator_url = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(secs) = file_cfg.get("prefetch_delay_secs").and_then(|v| v.parse().ok()) {
        settings.prefetch_delay = Duration::from_secs(secs);
    }
    if let Some(limit) = file_cfg.get("history_limit").and_then(|v| v.parse().ok()) {
        settings.history_limit = limit;
    }
    if let Some(secs) = file_cfg.get("request_timeout_secs").and_then(|v| v.parse().ok()) {
        settings.request_timeout = Duration::from_secs(secs);
    }
}

/// Later names win, so `APP__*` overrides `LEARNING_*`.
pub(crate) fn apply_env_settings(
    settings: &mut EngineSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    for key in ["LEARNING_COLLABORATOR_URL", "APP__COLLABORATOR_URL"] {
        if let Some(v) = lookup(key) {
            settings.collaborator_url = v;
        }
    }
    for key in ["LEARNING_DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = lookup(key) {
            settings.database_url = v;
        }
    }
    for key in ["LEARNING_PREFETCH_DELAY_SECS", "APP__PREFETCH_DELAY_SECS"] {
        if let Some(secs) = lookup(key).and_then(|v| v.parse().ok()) {
            settings.prefetch_delay = Duration::from_secs(secs);
        }
    }
    for key in ["LEARNING_HISTORY_LIMIT", "APP__HISTORY_LIMIT"] {
        if let Some(limit) = lookup(key).and_then(|v| v.parse().ok()) {
            settings.history_limit = limit;
        }
    }
    if let Some(secs) = lookup("APP__REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        settings.request_timeout = Duration::from_secs(secs);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
