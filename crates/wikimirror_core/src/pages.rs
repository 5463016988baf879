use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::{info, warn};

use crate::client::WikiApi;
use crate::extract::{PageExtractor, format_content};
use crate::filesystem::{relative_path_for_url, with_appended_extension, write_file};
use crate::tree::{NavigationNode, PageLocator};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub full_title: Option<String>,
    pub relative_url: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarkdownReport {
    pub written: usize,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataReport {
    pub written: usize,
    pub skipped: Vec<String>,
    pub missing_tree_nodes: Vec<String>,
}

/// Fetch each page and write its content payload as `<markdown_dir>/<path>.md`.
///
/// Pages whose payload cannot be found, whose request fails, or whose URL cannot be
/// mapped to a local path are skipped.
pub fn download_markdown<A: WikiApi, E: PageExtractor>(
    api: &mut A,
    extractor: &E,
    locators: &[PageLocator],
    base_url: &str,
    markdown_dir: &Path,
) -> Result<MarkdownReport> {
    let mut report = MarkdownReport::default();
    for locator in locators {
        let body = match api.fetch_page(&locator.url) {
            Ok(body) => body,
            Err(error) => {
                let error = format!("{error:#}");
                warn!(url = %locator.url, %error, "page markdown skipped");
                report.skipped.push(locator.url.clone());
                continue;
            }
        };
        let Some(raw) = extractor.content(&body) else {
            warn!(url = %locator.url, "page markdown skipped: no content payload");
            report.skipped.push(locator.url.clone());
            continue;
        };

        let content = format_content(&raw, base_url);
        match write_page(markdown_dir, &locator.url, base_url, "md", content.as_bytes()) {
            Ok(path) => {
                info!(url = %locator.url, path = %path.display(), "downloaded page markdown");
                report.written += 1;
            }
            Err(error) => {
                let error = format!("{error:#}");
                warn!(url = %locator.url, %error, "page markdown skipped");
                report.skipped.push(locator.url.clone());
            }
        }
    }
    Ok(report)
}

/// Fetch each page again and write its metadata record as `<metadata_dir>/<path>.json`.
///
/// A failed request aborts. A page missing from the tree aborts when `strict_tree_lookup`
/// is set; otherwise its `full_title` is written as null. A page that cannot be written
/// is skipped.
pub fn download_metadata<A: WikiApi, E: PageExtractor>(
    api: &mut A,
    extractor: &E,
    tree: &NavigationNode,
    locators: &[PageLocator],
    base_url: &str,
    metadata_dir: &Path,
    strict_tree_lookup: bool,
) -> Result<MetadataReport> {
    let mut report = MetadataReport::default();
    for locator in locators {
        let body = api
            .fetch_page(&locator.url)
            .with_context(|| format!("failed to fetch page metadata {}", locator.url))?;
        let slug = locator.relative_slug(base_url);
        let full_title = match tree.find_by_slug(slug) {
            Some(node) => Some(node.full_title.clone()),
            None if strict_tree_lookup => {
                bail!("page {} has no node in the navigation tree", locator.url)
            }
            None => {
                warn!(url = %locator.url, "page has no navigation node; full_title left empty");
                report.missing_tree_nodes.push(locator.url.clone());
                None
            }
        };

        let metadata = page_metadata(extractor, &body, locator, base_url, full_title);
        let json = to_json_indented(&metadata)?;
        match write_page(metadata_dir, &locator.url, base_url, "json", &json) {
            Ok(path) => {
                info!(url = %locator.url, path = %path.display(), "downloaded page metadata");
                report.written += 1;
            }
            Err(error) => {
                let error = format!("{error:#}");
                warn!(url = %locator.url, %error, "page metadata skipped");
                report.skipped.push(locator.url.clone());
            }
        }
    }
    Ok(report)
}

pub fn page_metadata<E: PageExtractor>(
    extractor: &E,
    body: &str,
    locator: &PageLocator,
    base_url: &str,
    full_title: Option<String>,
) -> PageMetadata {
    let fields = extractor.fields(body);
    PageMetadata {
        title: fields.title,
        full_title,
        relative_url: locator.relative_url(base_url),
        username: fields.username,
        display_name: fields.display_name,
        created_at: fields.created_at,
    }
}

/// Map `url` below `root` and write `contents` there. Errors here only cost the one page.
fn write_page(
    root: &Path,
    url: &str,
    base_url: &str,
    extension: &str,
    contents: &[u8],
) -> Result<PathBuf> {
    let relative = relative_path_for_url(url, base_url)?;
    let path = root.join(with_appended_extension(&relative, extension));
    write_file(&path, contents)?;
    Ok(path)
}

/// Pretty JSON with four-space indentation; non-ASCII is written verbatim.
pub fn to_json_indented<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .context("failed to serialize page metadata")?;
    Ok(out)
}
