use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

/// Local relative path for a wiki URL: strip the base URL and turn each
/// `/`-separated segment into a path component.
pub fn relative_path_for_url(url: &str, base_url: &str) -> Result<PathBuf> {
    let relative = url.strip_prefix(base_url).unwrap_or(url);
    let mut path = PathBuf::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => continue,
            ".." => bail!("refusing parent-directory segment in {url}"),
            _ => path.push(segment),
        }
    }
    if path.as_os_str().is_empty() {
        bail!("URL has no path below the wiki root: {url}");
    }
    Ok(path)
}

/// Append `.ext` to the final component, keeping any dots already in it.
pub fn with_appended_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Regular files under `root`, optionally filtered by extension, in file-name order.
pub fn collect_files(root: &Path, extension: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(extension) = extension
            && entry.path().extension().and_then(|ext| ext.to_str()) != Some(extension)
        {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}
