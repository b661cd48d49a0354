use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "checkwiki/0.2 (+https://github.com/checkwiki/checkwiki)";
pub const DEFAULT_TRACKER_URL: &str = "https://checkwiki.toolforge.org/cgi-bin/checkwiki.cgi";
pub const DEFAULT_PROJECT: &str = "enwiki";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CheckwikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub fixes: FixesSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TrackerSection {
    pub url: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FixesSection {
    #[serde(default)]
    pub unsafe_extlinks: bool,
    #[serde(default)]
    pub unsafe_missing_references: bool,
}

impl CheckwikiConfig {
    /// Resolve the wiki API URL: env `WIKI_API_URL` > config > None.
    pub fn api_url(&self) -> Option<String> {
        if let Some(value) = non_empty_env("WIKI_API_URL") {
            return Some(value);
        }
        self.wiki.api_url.clone()
    }

    /// Resolve the user agent: env `WIKI_USER_AGENT` > config > default.
    pub fn user_agent(&self) -> String {
        if let Some(value) = non_empty_env("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the tracker URL: env `CHECKWIKI_TRACKER_URL` > config > default.
    pub fn tracker_url(&self) -> String {
        if let Some(value) = non_empty_env("CHECKWIKI_TRACKER_URL") {
            return value;
        }
        self.tracker
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_TRACKER_URL.to_string())
    }

    /// Resolve the tracker project: env `CHECKWIKI_PROJECT` > config > default.
    pub fn project(&self) -> String {
        if let Some(value) = non_empty_env("CHECKWIKI_PROJECT") {
            return value;
        }
        self.tracker
            .project
            .clone()
            .unwrap_or_else(|| DEFAULT_PROJECT.to_string())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse a config from a TOML file. Returns defaults if the file
/// does not exist.
pub fn load_config(config_path: &Path) -> Result<CheckwikiConfig> {
    if !config_path.exists() {
        return Ok(CheckwikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CheckwikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{CheckwikiConfig, DEFAULT_PROJECT, DEFAULT_TRACKER_URL, load_config};

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(std::path::Path::new("/nonexistent/checkwiki.toml")).unwrap();
        assert_eq!(config, CheckwikiConfig::default());
        assert_eq!(config.tracker_url(), DEFAULT_TRACKER_URL);
        assert_eq!(config.project(), DEFAULT_PROJECT);
    }

    #[test]
    fn config_file_values_are_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkwiki.toml");
        fs::write(
            &path,
            r#"
[wiki]
api_url = "https://wiki.example.org/w/api.php"

[tracker]
project = "examplewiki"

[fixes]
unsafe_extlinks = true
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(
            config.api_url().as_deref(),
            Some("https://wiki.example.org/w/api.php")
        );
        assert_eq!(config.project(), "examplewiki");
        assert!(config.fixes.unsafe_extlinks);
        assert!(!config.fixes.unsafe_missing_references);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkwiki.toml");
        fs::write(&path, "wiki = not-a-table").unwrap();
        assert!(load_config(&path).is_err());
    }
}
