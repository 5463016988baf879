use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_WIKI_URL: &str = "https://wiki.yandex.ru/";
pub const DEFAULT_USER_AGENT: &str = "PostmanRuntime/7.39.0";
pub const DEFAULT_BANNED_SEGMENT: &str = "users";
pub const DEFAULT_FLAT_SUFFIX: &str = "_flat";
pub const DEFAULT_CONFIG_FILENAME: &str = "wikimirror.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub backup: BackupSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BackupSection {
    pub output_dir: Option<PathBuf>,
    pub banned_segment: Option<String>,
    pub flat_suffix: Option<String>,
    pub strict_tree_lookup: Option<bool>,
}

impl MirrorConfig {
    /// Resolve the wiki base URL: env WIKI_URL > config > DEFAULT_WIKI_URL.
    /// Always ends with a slash so slugs can be joined onto it.
    pub fn wiki_url(&self) -> String {
        let raw = env_value("WIKI_URL")
            .or_else(|| self.wiki.url.clone())
            .unwrap_or_else(|| DEFAULT_WIKI_URL.to_string());
        normalize_base_url(&raw)
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_value("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Request timeout, if any. Without one the transport default applies.
    pub fn timeout_ms(&self) -> Option<u64> {
        env_value("WIKI_HTTP_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .or(self.wiki.timeout_ms)
    }

    pub fn banned_segment(&self) -> &str {
        self.backup
            .banned_segment
            .as_deref()
            .unwrap_or(DEFAULT_BANNED_SEGMENT)
    }

    pub fn flat_suffix(&self) -> &str {
        self.backup
            .flat_suffix
            .as_deref()
            .unwrap_or(DEFAULT_FLAT_SUFFIX)
    }

    /// Whether a page with no matching tree node aborts the run.
    pub fn strict_tree_lookup(&self) -> bool {
        self.backup.strict_tree_lookup.unwrap_or(true)
    }
}

/// Load and parse a MirrorConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    if !config_path.exists() {
        return Ok(MirrorConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MirrorConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn env_value(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
