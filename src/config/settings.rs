use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use toml_edit::DocumentMut;

use crate::error::{Result, RunnerError};
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the runner server
    pub server_url: String,
    /// Model passed to new runs when the caller doesn't pick one
    pub default_model: Option<String>,
    /// Preferred agent engine (e.g. "codex", "qwen")
    pub engine: Option<String>,
    /// Run the post-run push step (git_fpush.sh)
    pub git_fpush: bool,
    /// Strip the injected system prompt from rendered output
    pub hide_injected_prompt: bool,
    /// Lines of the injected prompt to strip when `hide_injected_prompt` is set
    pub hidden_prompt_phrases: Vec<String>,
    /// Run history sidebar settings
    pub sidebar: SidebarConfig,
    /// Debounce and timeout windows
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct SidebarConfig {
    /// Runs per sidebar page
    pub page_size: usize,
    /// How often the background poller refreshes the run list
    pub poll_interval: Duration,
    /// How long a fetched run list is reused without `force`
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    /// Debounce window for file-tree fetches on directory input
    pub file_tree_debounce: Duration,
    /// Fallback hide timer for the diff-view loader
    pub diff_loader_timeout: Duration,
}

impl Default for SidebarConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            poll_interval: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(5),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".to_string(),
            default_model: None,
            engine: None,
            git_fpush: true,
            hide_injected_prompt: false,
            hidden_prompt_phrases: Vec::new(),
            sidebar: SidebarConfig::default(),
            timing: TimingConfig {
                file_tree_debounce: Duration::from_millis(500),
                diff_loader_timeout: Duration::from_secs(15),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlSidebarConfig {
    pub page_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlTimingConfig {
    pub file_tree_debounce_ms: Option<u64>,
    pub diff_loader_timeout_ms: Option<u64>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub server_url: Option<String>,
    pub default_model: Option<String>,
    pub engine: Option<String>,
    pub git_fpush: Option<bool>,
    pub hide_injected_prompt: Option<bool>,
    pub hidden_prompt_phrases: Option<Vec<String>>,
    pub sidebar: Option<TomlSidebarConfig>,
    pub timing: Option<TomlTimingConfig>,
}

impl Config {
    /// Load configuration from the default config file, merging with defaults.
    ///
    /// A commented example file is written on first run. Unreadable or
    /// malformed files are logged and ignored.
    pub fn load() -> Self {
        let config_file = config_path();

        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::load_from(&config_file) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %config_file.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );
                Config::default()
            }
        }
    }

    /// Load configuration from a specific file, merging with defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        if !path.exists() {
            return Ok(config);
        }

        let contents = fs::read_to_string(path)?;
        let toml_config: TomlConfig =
            toml::from_str(&contents).map_err(|e| RunnerError::Config(e.to_string()))?;
        config.merge(toml_config);
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(url) = toml_config.server_url {
            self.server_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = toml_config.default_model.filter(|m| !m.trim().is_empty()) {
            self.default_model = Some(model);
        }
        if let Some(engine) = toml_config.engine.filter(|e| !e.trim().is_empty()) {
            self.engine = Some(engine);
        }
        if let Some(git_fpush) = toml_config.git_fpush {
            self.git_fpush = git_fpush;
        }
        if let Some(hide) = toml_config.hide_injected_prompt {
            self.hide_injected_prompt = hide;
        }
        if let Some(phrases) = toml_config.hidden_prompt_phrases {
            self.hidden_prompt_phrases = phrases;
        }

        if let Some(sidebar) = toml_config.sidebar {
            if let Some(page_size) = sidebar.page_size.filter(|n| *n > 0) {
                self.sidebar.page_size = page_size;
            }
            if let Some(ms) = sidebar.poll_interval_ms.filter(|ms| *ms > 0) {
                self.sidebar.poll_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = sidebar.cache_ttl_ms {
                self.sidebar.cache_ttl = Duration::from_millis(ms);
            }
        }

        if let Some(timing) = toml_config.timing {
            if let Some(ms) = timing.file_tree_debounce_ms {
                self.timing.file_tree_debounce = Duration::from_millis(ms);
            }
            if let Some(ms) = timing.diff_loader_timeout_ms {
                self.timing.diff_loader_timeout = Duration::from_millis(ms);
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &PathBuf) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_hidden_prompt(mut self, phrases: Vec<String>) -> Self {
        self.hide_injected_prompt = true;
        self.hidden_prompt_phrases = phrases;
        self
    }
}

/// Save the default model to the config file at `config_file`.
///
/// Reads the existing document, updates `default_model` in place and writes it
/// back while preserving all other content and comments.
pub fn save_default_model_to(config_file: &Path, model: Option<&str>) -> Result<()> {
    let contents = if config_file.exists() {
        fs::read_to_string(config_file)?
    } else {
        String::new()
    };

    let mut doc: DocumentMut = contents
        .parse()
        .map_err(|e: toml_edit::TomlError| RunnerError::Config(e.to_string()))?;

    match model {
        Some(model) => doc["default_model"] = toml_edit::value(model),
        None => {
            doc.remove("default_model");
        }
    }

    if let Some(parent) = config_file.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(config_file, doc.to_string())?;
    Ok(())
}

/// Save the default model to the user's config file
pub fn save_default_model(model: Option<&str>) -> Result<()> {
    save_default_model_to(&config_path(), model)
}
