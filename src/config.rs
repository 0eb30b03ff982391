use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoint: String,
    pub text_model: String,
    pub vision_model: String,
    pub plan_model: String,
    pub request_timeout_secs: u64,
    pub plan_timeout_secs: u64,
    pub max_content_chars: usize,
    pub concurrency: usize,
    pub max_attempts: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            text_model: "llama3.2".to_string(),
            vision_model: "moondream".to_string(),
            plan_model: "llama3".to_string(),
            request_timeout_secs: 60,
            plan_timeout_secs: 300,
            max_content_chars: 5000,
            concurrency: 4,
            max_attempts: 3,
        }
    }
}

/// Command-line values that win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub endpoint: Option<String>,
    pub concurrency: Option<usize>,
}

impl Settings {
    /// Defaults, then the TOML file, then `RESHELF_*` variables, then CLI
    /// overrides. An explicit `config_path` must exist; the default location
    /// is optional.
    pub fn load(
        config_path: Option<&Path>,
        overrides: &SettingsOverrides,
    ) -> Result<Self, AppError> {
        let mut settings = match config_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.apply_overrides(overrides);
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("invalid {}: {e}", path.display())))
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("RESHELF_ENDPOINT") {
            self.endpoint = value;
        }
        if let Some(value) = lookup("RESHELF_TEXT_MODEL") {
            self.text_model = value;
        }
        if let Some(value) = lookup("RESHELF_VISION_MODEL") {
            self.vision_model = value;
        }
        if let Some(value) = lookup("RESHELF_PLAN_MODEL") {
            self.plan_model = value;
        }
        if let Some(value) = lookup("RESHELF_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("RESHELF_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("RESHELF_CONCURRENCY") {
            self.concurrency = parse_number("RESHELF_CONCURRENCY", &value)?;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(endpoint) = &overrides.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.endpoint.trim().is_empty() {
            return Err(AppError::Config("endpoint must not be empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 || self.plan_timeout_secs == 0 {
            return Err(AppError::Config("timeouts must be positive".to_string()));
        }
        if self.max_content_chars == 0 {
            return Err(AppError::Config(
                "max_content_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn plan_timeout(&self) -> Duration {
        Duration::from_secs(self.plan_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{key} is not a number: {value}")))
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "reshelf")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
