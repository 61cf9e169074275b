//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use weave_agent::{CompactionConfig, ExecutorConfig, RouterConfig};

/// Configuration for weave
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Custom system prompt file path
    pub system_prompt_file: Option<String>,
    /// Reasoning loop settings
    pub router: RouterConfig,
    /// Parallel dispatch settings
    pub executor: ExecutorConfig,
    /// Context compaction settings
    pub compaction: CompactionConfig,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("weave")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("WEAVE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config file");
                Self::default()
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        Config::default().save()?;
        Ok(path)
    }

    /// System prompt from the configured file, else the router section
    pub fn system_prompt(&self) -> Option<String> {
        let from_file = self.system_prompt_file.as_ref().and_then(|file| {
            fs::read_to_string(file)
                .map_err(|e| tracing::warn!(file = %file, error = %e, "failed to read system prompt file"))
                .ok()
        });
        from_file.or_else(|| self.router.system_prompt.clone())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# weave configuration file
# Place at ~/.config/weave/config.toml (Linux/Mac) or %APPDATA%\weave\config.toml (Windows)

# Custom system prompt file (optional)
# system_prompt_file = "~/.config/weave/system_prompt.txt"

[router]
# Model calls allowed before the loop stops with a bounded-out notice
max_iterations = 10
# system_prompt = "You are a data analysis assistant."

[executor]
# Cap on tool calls running at once (unset = no cap)
# max_concurrency = 4

[compaction]
enabled = true
# Compact once the live history is estimated above this many tokens
window_size = 64000
# Conversations with this many human messages or fewer are never compacted
min_human_messages = 2
# Budget of the window kept hot after compaction
window_max_messages = 16
window_max_tokens = 2048
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_matches_defaults() {
        let config = Config::parse(example_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.router.max_iterations, defaults.router.max_iterations);
        assert_eq!(config.executor.max_concurrency, None);
        assert_eq!(config.compaction.window_size, defaults.compaction.window_size);
        assert_eq!(
            config.compaction.window_max_messages,
            defaults.compaction.window_max_messages
        );
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = Config::parse("[router]\nmax_iterations = 3\n").unwrap();
        assert_eq!(config.router.max_iterations, 3);
        assert!(config.compaction.enabled);
        assert_eq!(config.compaction.window_max_tokens, 2048);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(Config::parse("[router]\nmax_iterations = \"many\"\n").is_err());
    }
}
