use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use client_core::api::DEFAULT_API_BASE_URL;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "admin.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub database_url: String,
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            database_url: "sqlite://./data/admin.db".into(),
            poll_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    database_url: Option<String>,
    poll_interval_ms: Option<u64>,
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid api base url '{}'", self.api_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("api base url '{}' must use http or https", self.api_base_url);
        }
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be greater than zero");
        }
        Ok(())
    }
}

/// Defaults, then the config file (if present), then the environment.
pub fn load_settings(config_path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(config_path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse '{}'", config_path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", config_path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("APP__POLL_INTERVAL_MS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.poll_interval_ms = parsed;
        }
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/admin.db"),
            "sqlite://./data/admin.db"
        );
        assert_eq!(
            normalize_database_url("sqlite:data\\admin.db"),
            "sqlite://data/admin.db"
        );
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    }

    #[test]
    fn missing_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");

        let settings = load_settings(&dir.path().join("absent.toml")).expect("load");

        assert_eq!(settings.poll_interval_ms, Settings::default().poll_interval_ms);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            "api_base_url = \"https://exams.example.edu/api/v1\"\npoll_interval_ms = 2500\n",
        )
        .expect("write config");

        let raw = fs::read_to_string(&path).expect("read config");
        let mut settings = Settings::default();
        apply_file(&mut settings, toml::from_str(&raw).expect("parse"));

        assert_eq!(settings.api_base_url, "https://exams.example.edu/api/v1");
        assert_eq!(settings.poll_interval_ms, 2500);
        assert_eq!(settings.database_url, Settings::default().database_url);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "poll_interval_ms = \"soon\"\n").expect("write config");

        assert!(load_settings(&path).is_err());
    }

    #[test]
    fn prefixed_env_wins_over_plain_env() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("API_BASE_URL", "http://plain:8000/api/v1"),
            ("APP__API_BASE_URL", "http://prefixed:8000/api/v1"),
            ("DATABASE_URL", "sqlite://./plain.db"),
            ("APP__POLL_INTERVAL_MS", "not-a-number"),
        ]);
        let mut settings = Settings::default();

        apply_env(&mut settings, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.api_base_url, "http://prefixed:8000/api/v1");
        assert_eq!(settings.database_url, "sqlite://./plain.db");
        assert_eq!(settings.poll_interval_ms, 5000);
    }

    #[test]
    fn validate_rejects_bad_urls_and_zero_interval() {
        assert!(Settings::default().validate().is_ok());

        let mut settings = Settings {
            api_base_url: "ftp://exams.example.edu".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());

        settings.api_base_url = DEFAULT_API_BASE_URL.into();
        settings.poll_interval_ms = 0;
        assert!(settings.validate().is_err());
    }
}
