use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::events::ModelDescriptor;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, THINKING_PLACEHOLDER};

/// Address of a local Ollama server
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:11434";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the model server
    pub server_url: String,

    /// Models offered in the picker; the first one is selected at startup
    pub models: Vec<ModelDescriptor>,

    /// System prompt sent ahead of every user turn
    pub system_prompt: String,

    /// Text shown while the model is reasoning; nothing is shown when unset
    pub thinking_placeholder: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_url: DEFAULT_SERVER_URL.to_string(),
            models: default_models(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            thinking_placeholder: None,
        }
    }
}

fn default_models() -> Vec<ModelDescriptor> {
    ["1.5b", "7b", "8b", "14b", "32b", "70b"]
        .iter()
        .map(|size| {
            ModelDescriptor::new(
                format!("DeepSeek-R1 {}", size),
                format!("deepseek-r1:{}", size),
            )
        })
        .collect()
}

impl Config {
    /// Directory holding the config file and logs
    pub fn home_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".seekpanel"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }

    /// Load configuration from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let parsed: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!(path = %path.display(), "loaded configuration");
            parsed
        } else {
            info!(path = %path.display(), "no config file, using defaults");
            Config::default()
        };

        Ok(config.with_env_overrides().normalized())
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply `OLLAMA_HOST` when it is set
    pub fn with_env_overrides(self) -> Self {
        self.with_host_override(std::env::var("OLLAMA_HOST").ok())
    }

    /// Use `host` as the server URL unless it is missing or blank
    pub fn with_host_override(mut self, host: Option<String>) -> Self {
        if let Some(host) = host {
            if !host.trim().is_empty() {
                self.server_url = host;
            }
        }
        self
    }

    /// Replace empty or missing values with the built-in defaults
    pub fn normalized(mut self) -> Self {
        let trimmed = self.server_url.trim();
        if trimmed.is_empty() {
            warn!("server_url is empty, falling back to {}", DEFAULT_SERVER_URL);
            self.server_url = DEFAULT_SERVER_URL.to_string();
        } else if !trimmed.contains("://") {
            self.server_url = format!("http://{}", trimmed);
        } else {
            self.server_url = trimmed.to_string();
        }
        self.server_url = self.server_url.trim_end_matches('/').to_string();

        self.models.retain(|model| !model.value.trim().is_empty());
        if self.models.is_empty() {
            warn!("no models configured, falling back to the default model list");
            self.models = default_models();
        }

        if self.system_prompt.trim().is_empty() {
            warn!("system_prompt is empty, falling back to the default prompt");
            self.system_prompt = DEFAULT_SYSTEM_PROMPT.to_string();
        }

        if let Some(placeholder) = &self.thinking_placeholder {
            if placeholder.is_empty() {
                self.thinking_placeholder = None;
            }
        }

        self
    }

    /// Identifier of the model selected at startup
    pub fn default_model(&self) -> &str {
        self.models
            .first()
            .map(|model| model.value.as_str())
            .unwrap_or("deepseek-r1:1.5b")
    }

    pub fn has_model(&self, value: &str) -> bool {
        self.models.iter().any(|model| model.value == value)
    }
}

/// Settings given on the command line; they win over the file and `OLLAMA_HOST`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub server_url: Option<String>,
    pub show_thinking: bool,
}

impl Overrides {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(server_url) = &self.server_url {
            config.server_url = server_url.clone();
        }
        if self.show_thinking && config.thinking_placeholder.is_none() {
            config.thinking_placeholder = Some(THINKING_PLACEHOLDER.to_string());
        }
        config.normalized()
    }
}

/// Where the configuration comes from, so it can be loaded again on reload
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub overrides: Overrides,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overrides: Overrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Read the file, then apply the environment and command line overrides
    pub fn load(&self) -> Result<Config> {
        Ok(self.overrides.apply(Config::load_from(&self.path)?))
    }
}
