use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

use crate::config::{DEFAULT_CONFIG_FILENAME, MirrorConfig};

pub const MARKDOWN_DIR_NAME: &str = "pages_markdown";
pub const METADATA_DIR_NAME: &str = "pages_metadata";
pub const ATTACHMENTS_DIR_NAME: &str = "attachments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub output_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub config_path: PathBuf,
    pub output_dir: PathBuf,
    pub config_source: ValueSource,
    pub output_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({})\noutput_dir={} ({})",
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.output_dir),
            self.output_source.as_str(),
        )
    }
}

/// Resolve the config file location: flag > env WIKIMIRROR_CONFIG > ./wikimirror.toml.
pub fn resolve_config_path(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> (PathBuf, ValueSource) {
    resolve_config_path_with_lookup(context, overrides, |key| env::var(key).ok())
}

/// Resolve the output base directory: flag > env WIKIMIRROR_OUTPUT_DIR > config > ./data.
pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &MirrorConfig,
) -> ResolvedPaths {
    resolve_paths_with_lookup(context, overrides, config, |key| env::var(key).ok())
}

fn resolve_config_path_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.config.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = non_empty(lookup_env("WIKIMIRROR_CONFIG")) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }
    (
        context.cwd.join(DEFAULT_CONFIG_FILENAME),
        ValueSource::Default,
    )
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &MirrorConfig,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, config_source) =
        resolve_config_path_with_lookup(context, overrides, &lookup_env);

    let (output_dir, output_source) = if let Some(path) = overrides.output_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKIMIRROR_OUTPUT_DIR")) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else if let Some(path) = config.backup.output_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Config)
    } else {
        (context.cwd.join("data"), ValueSource::Default)
    };

    ResolvedPaths {
        config_path,
        output_dir,
        config_source,
        output_source,
    }
}

/// On-disk layout of one backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    pub root: PathBuf,
    pub markdown_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub attachments_dir: PathBuf,
}

impl BackupLayout {
    pub fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            markdown_dir: root.join(MARKDOWN_DIR_NAME),
            metadata_dir: root.join(METADATA_DIR_NAME),
            attachments_dir: root.join(ATTACHMENTS_DIR_NAME),
        }
    }

    pub fn for_date(output_dir: &Path, date: NaiveDate) -> Self {
        Self::at(&output_dir.join(date_directory_name(date)))
    }

    pub fn for_today(output_dir: &Path) -> Self {
        Self::for_date(output_dir, Local::now().date_naive())
    }

    /// Delete any previous run for this date and recreate the three source trees.
    pub fn reset(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("failed to remove {}", self.root.display()))?;
        }
        for dir in [&self.markdown_dir, &self.metadata_dir, &self.attachments_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Sibling directory receiving the flattened copy of `source`.
    pub fn flat_dir(source: &Path, suffix: &str) -> PathBuf {
        let mut name = source
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        source.with_file_name(name)
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "backup_root={}\nmarkdown_dir={}\nmetadata_dir={}\nattachments_dir={}",
            normalize_for_display(&self.root),
            normalize_for_display(&self.markdown_dir),
            normalize_for_display(&self.metadata_dir),
            normalize_for_display(&self.attachments_dir),
        )
    }
}

pub fn date_directory_name(date: NaiveDate) -> String {
    date.format("%Y_%m_%d").to_string()
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
