use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::filesystem::collect_files;
use crate::runtime::BackupLayout;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FlattenReport {
    pub destination: PathBuf,
    pub copied: usize,
    pub excluded: usize,
}

/// `a/b/c.md` -> `a_b_c.md`.
pub fn flat_file_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_")
}

fn contains_segment(relative: &Path, segment: &str) -> bool {
    relative
        .components()
        .any(|component| component.as_os_str() == segment)
}

/// Copy every file under `source` into the single-level `destination`, naming
/// each copy after its relative path with separators replaced by `_`.
///
/// Files with `banned_segment` anywhere in their relative path are left out.
/// Colliding names overwrite each other; the source tree is not modified.
pub fn flatten_directory(
    source: &Path,
    destination: &Path,
    banned_segment: &str,
    extension: Option<&str>,
) -> Result<FlattenReport> {
    fs::create_dir_all(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;

    let mut report = FlattenReport {
        destination: destination.to_path_buf(),
        ..FlattenReport::default()
    };
    for file in collect_files(source, extension)? {
        let relative = file
            .strip_prefix(source)
            .with_context(|| format!("{} is outside {}", file.display(), source.display()))?;
        if contains_segment(relative, banned_segment) {
            report.excluded += 1;
            continue;
        }
        let target = destination.join(flat_file_name(relative));
        fs::copy(&file, &target).with_context(|| {
            format!("failed to copy {} to {}", file.display(), target.display())
        })?;
        report.copied += 1;
    }
    Ok(report)
}

/// Flatten the markdown, metadata and attachment trees of one backup.
pub fn flatten_backup(
    layout: &BackupLayout,
    suffix: &str,
    banned_segment: &str,
) -> Result<Vec<FlattenReport>> {
    let trees = [
        (&layout.markdown_dir, Some("md")),
        (&layout.metadata_dir, Some("json")),
        (&layout.attachments_dir, None),
    ];
    let mut reports = Vec::with_capacity(trees.len());
    for (source, extension) in trees {
        let destination = BackupLayout::flat_dir(source, suffix);
        let report = flatten_directory(source, &destination, banned_segment, extension)?;
        info!(
            source = %source.display(),
            destination = %destination.display(),
            copied = report.copied,
            excluded = report.excluded,
            "flattened directory"
        );
        reports.push(report);
    }
    Ok(reports)
}
