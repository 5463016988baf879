use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use tracing::{info, warn};

use crate::client::WikiApi;
use crate::filesystem::{collect_files, relative_path_for_url, write_file};

static RE_IMAGE_EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[.*?\]\((/[^\s)]*)").expect("valid image embed pattern"));
static RE_FILE_EMBED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{% file src="(/[^"\s]*)""#).expect("valid file embed pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentReference {
    pub url: String,
    /// Markdown file the reference was found in.
    pub source: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentFailure {
    pub url: String,
    /// Markdown file that embedded the attachment.
    pub source: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttachmentReport {
    pub downloaded: usize,
    pub failures: Vec<AttachmentFailure>,
}

/// Root-relative paths embedded in `content`: image embeds first, then file directives.
pub fn scan_references(content: &str) -> Vec<&str> {
    let images = RE_IMAGE_EMBED
        .captures_iter(content)
        .filter_map(|captures| captures.get(1));
    let files = RE_FILE_EMBED
        .captures_iter(content)
        .filter_map(|captures| captures.get(1));
    images.chain(files).map(|value| value.as_str()).collect()
}

/// Read back every markdown file and collect its attachment references.
///
/// Non-ASCII paths are kept verbatim. The result keeps duplicates; a resource embedded twice is downloaded twice.
pub fn discover_attachments(markdown_dir: &Path, base_url: &str) -> Result<Vec<AttachmentReference>> {
    let base = Url::parse(base_url).with_context(|| format!("invalid wiki URL: {base_url}"))?;
    // Captured paths are root-relative; resolve them against the origin without re-encoding.
    let origin = base.origin().ascii_serialization();
    let mut references = Vec::new();
    for file in collect_files(markdown_dir, Some("md"))? {
        let content = fs::read_to_string(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        for path in scan_references(&content) {
            references.push(AttachmentReference {
                url: format!("{origin}{path}"),
                source: file.clone(),
            });
        }
    }
    info!(attachments = references.len(), "found attachments");
    Ok(references)
}

/// Download every reference to its mirrored path. Failures are logged and the loop continues.
pub fn download_attachments<A: WikiApi>(
    api: &mut A,
    references: &[AttachmentReference],
    base_url: &str,
    attachments_dir: &Path,
) -> AttachmentReport {
    let mut report = AttachmentReport::default();
    for reference in references {
        match download_one(api, &reference.url, base_url, attachments_dir) {
            Ok(path) => {
                info!(url = %reference.url, path = %path.display(), "downloaded attachment");
                report.downloaded += 1;
            }
            Err(error) => {
                let error = format!("{error:#}");
                warn!(
                    url = %reference.url,
                    source = %reference.source.display(),
                    %error,
                    "attachment download failed"
                );
                report.failures.push(AttachmentFailure {
                    url: reference.url.clone(),
                    source: reference.source.clone(),
                    error,
                });
            }
        }
    }
    report
}

fn download_one<A: WikiApi>(
    api: &mut A,
    url: &str,
    base_url: &str,
    attachments_dir: &Path,
) -> Result<PathBuf> {
    let path = attachments_dir.join(relative_path_for_url(url, base_url)?);
    let bytes = api.fetch_attachment(url)?;
    write_file(&path, &bytes)?;
    Ok(path)
}
