use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::attachments::{AttachmentReport, discover_attachments, download_attachments};
use crate::client::{Credentials, WikiApi, WikiClient, WikiClientConfig};
use crate::config::MirrorConfig;
use crate::extract::PatternExtractor;
use crate::flatten::{FlattenReport, flatten_backup};
use crate::pages::{MarkdownReport, MetadataReport, download_markdown, download_metadata};
use crate::runtime::BackupLayout;
use crate::tree::{extract_page_urls, fetch_navigation_tree};

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub base_url: String,
    pub banned_segment: String,
    pub flat_suffix: String,
    pub strict_tree_lookup: bool,
}

impl BackupOptions {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            base_url: config.wiki_url(),
            banned_segment: config.banned_segment().to_string(),
            flat_suffix: config.flat_suffix().to_string(),
            strict_tree_lookup: config.strict_tree_lookup(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub root: PathBuf,
    pub org_id: String,
    pub pages: usize,
    pub markdown: MarkdownReport,
    pub metadata: MetadataReport,
    pub attachments_found: usize,
    pub attachments: AttachmentReport,
    pub flattened: Vec<FlattenReport>,
    pub request_count: usize,
}

/// Full run against the live wiki, written under `layout`.
pub fn create_backup(
    config: &MirrorConfig,
    credentials: Credentials,
    layout: &BackupLayout,
) -> Result<BackupReport> {
    let mut client = WikiClient::new(WikiClientConfig::from_config(config), credentials)?;
    run_backup_with_api(&mut client, &BackupOptions::from_config(config), layout)
}

/// Authenticate, reset the output directory, then crawl, extract, download and flatten.
///
/// Nothing on disk is touched until authentication succeeds.
pub fn run_backup_with_api<A: WikiApi>(
    api: &mut A,
    options: &BackupOptions,
    layout: &BackupLayout,
) -> Result<BackupReport> {
    let org_id = api.authenticate().context("authentication failed")?;
    info!(root = %layout.root.display(), "starting backup");
    layout.reset()?;

    let tree = fetch_navigation_tree(api)?;
    let locators = extract_page_urls(&tree, &options.base_url)?;

    let extractor = PatternExtractor;
    let markdown = download_markdown(
        api,
        &extractor,
        &locators,
        &options.base_url,
        &layout.markdown_dir,
    )?;
    let metadata = download_metadata(
        api,
        &extractor,
        &tree,
        &locators,
        &options.base_url,
        &layout.metadata_dir,
        options.strict_tree_lookup,
    )?;

    let references = discover_attachments(&layout.markdown_dir, &options.base_url)?;
    let attachments =
        download_attachments(api, &references, &options.base_url, &layout.attachments_dir);

    let flattened = flatten_backup(layout, &options.flat_suffix, &options.banned_segment)?;
    info!("copied pages for retrieval export");

    Ok(BackupReport {
        root: layout.root.clone(),
        org_id,
        pages: locators.len(),
        markdown,
        metadata,
        attachments_found: references.len(),
        attachments,
        flattened,
        request_count: api.request_count(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use super::*;
    use crate::client::NavigationEntry;
    use crate::filesystem::write_file;
    use tempfile::tempdir;

    const BASE: &str = "https://wiki.example.org/";

    #[derive(Default)]
    struct MockApi {
        authorized: bool,
        children: BTreeMap<String, Vec<NavigationEntry>>,
        pages: BTreeMap<String, String>,
        blobs: BTreeMap<String, Vec<u8>>,
        page_requests: Vec<String>,
        request_count: usize,
    }

    impl MockApi {
        fn node(&mut self, parent: &str, slug: &str, title: &str, has_children: bool) {
            self.children
                .entry(parent.to_string())
                .or_default()
                .push(NavigationEntry {
                    slug: slug.to_string(),
                    title: title.to_string(),
                    has_children,
                });
        }

        fn page(&mut self, slug: &str, content: Option<&str>) {
            let payload = content
                .map(|content| format!(r#"{{"content":"{content}","owner":{{}}}}"#))
                .unwrap_or_default();
            self.pages.insert(
                format!("{BASE}{slug}"),
                format!(
                    r#"<title>{slug} | Wiki</title>{payload}{{"username":"jdoe","created_at":"2024-05-01"}}"#
                ),
            );
        }
    }

    impl WikiApi for MockApi {
        fn authenticate(&mut self) -> Result<String> {
            self.request_count += 1;
            if !self.authorized {
                anyhow::bail!("Unauthorized");
            }
            Ok("org-1".to_string())
        }

        fn open_navigation_node(&mut self, parent_slug: &str) -> Result<Vec<NavigationEntry>> {
            self.request_count += 1;
            Ok(self.children.get(parent_slug).cloned().unwrap_or_default())
        }

        fn fetch_page(&mut self, url: &str) -> Result<String> {
            self.request_count += 1;
            self.page_requests.push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no page {url}"))
        }

        fn fetch_attachment(&mut self, url: &str) -> Result<Vec<u8>> {
            self.request_count += 1;
            self.blobs
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("attachment request failed with HTTP 404: {url}"))
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    fn options() -> BackupOptions {
        BackupOptions {
            base_url: BASE.to_string(),
            banned_segment: "users".to_string(),
            flat_suffix: "_flat".to_string(),
            strict_tree_lookup: true,
        }
    }

    fn sample_api() -> MockApi {
        let mut api = MockApi {
            authorized: true,
            ..MockApi::default()
        };
        api.node("", "a", "Alpha.", true);
        api.node("", "b", "Beta", false);
        api.node("", "users", "Users", true);
        api.node("a", "a/a1", "One", false);
        api.node("users", "users/jdoe", "Jane", false);

        api.page("a", Some(r"# Alpha\n![diagram](/files/diagram.png)"));
        api.page("a/a1", Some(r#"{% file src="/files/design.pdf" %}"#));
        api.page("b", None);
        api.page("users", Some("user index"));
        api.page(
            "users/jdoe",
            Some(r"![me](https://wiki.example.org/files/me.png)\n![gone](/files/gone.png)"),
        );
        api.blobs
            .insert(format!("{BASE}files/diagram.png"), b"diagram".to_vec());
        api.blobs
            .insert(format!("{BASE}files/me.png"), b"me".to_vec());
        api
    }

    #[test]
    fn backup_writes_all_trees_and_flat_exports() {
        let temp = tempdir().expect("tempdir");
        let layout = BackupLayout::at(&temp.path().join("2024_07_03"));
        let mut api = sample_api();

        let report = run_backup_with_api(&mut api, &options(), &layout).expect("backup");

        assert_eq!(report.org_id, "org-1");
        assert_eq!(report.pages, 5);
        assert_eq!(report.markdown.written, 4);
        assert_eq!(report.markdown.skipped, vec![format!("{BASE}b")]);
        assert_eq!(report.metadata.written, 5);

        // a/a1 before a, users/jdoe before users; every page fetched once per stage.
        let order = ["a/a1", "a", "b", "users/jdoe", "users"]
            .iter()
            .map(|slug| format!("{BASE}{slug}"))
            .collect::<Vec<_>>();
        assert_eq!(api.page_requests[..5], order[..]);
        assert_eq!(api.page_requests[5..], order[..]);

        assert!(!layout.markdown_dir.join("b.md").exists());
        assert!(layout.metadata_dir.join("b.json").exists());
        assert_eq!(
            fs::read_to_string(layout.markdown_dir.join("a.md")).expect("read"),
            "# Alpha\n![diagram](/files/diagram.png)"
        );
        let metadata = fs::read_to_string(layout.metadata_dir.join("a").join("a1.json"))
            .expect("read metadata");
        assert!(metadata.contains("\"full_title\": \"Alpha. One.\""));
        assert!(metadata.contains("\"relative_url\": \"/a/a1\""));
        assert!(metadata.contains("\"display_name\": null"));

        assert_eq!(report.attachments_found, 4);
        assert_eq!(report.attachments.downloaded, 2);
        assert_eq!(report.attachments.failures.len(), 2);
        assert_eq!(
            fs::read(layout.attachments_dir.join("files").join("diagram.png")).expect("read"),
            b"diagram"
        );

        let flat_markdown = layout.root.join("pages_markdown_flat");
        assert!(flat_markdown.join("a.md").exists());
        assert!(flat_markdown.join("a_a1.md").exists());
        assert!(!flat_markdown.join("users_jdoe.md").exists());
        assert!(flat_markdown.join("users.md").exists());
        assert!(layout.root.join("pages_metadata_flat").join("b.json").exists());
        assert!(layout.root.join("attachments_flat").join("files_me.png").exists());
        assert_eq!(report.request_count, api.request_count);

        let summary = serde_json::to_value(&report).expect("summary json");
        assert_eq!(summary["markdown"]["written"], 4);
        assert_eq!(summary["attachments"]["failures"].as_array().map(Vec::len), Some(2));
        assert_eq!(summary["flattened"][0]["copied"], 3);
    }

    #[test]
    fn unmappable_slug_does_not_abort_the_run() {
        let temp = tempdir().expect("tempdir");
        let layout = BackupLayout::at(&temp.path().join("2024_07_03"));
        let mut api = MockApi {
            authorized: true,
            ..MockApi::default()
        };
        api.node("", "a/../../x", "Escape", false);
        api.node("", "ok", "Ok", false);
        api.page("a/../../x", Some("escape"));
        api.page("ok", Some("fine"));

        let report = run_backup_with_api(&mut api, &options(), &layout).expect("backup");

        assert_eq!(report.markdown.skipped, vec![format!("{BASE}a/../../x")]);
        assert_eq!(report.metadata.skipped, vec![format!("{BASE}a/../../x")]);
        assert!(layout.markdown_dir.join("ok.md").exists());
        assert!(layout.metadata_dir.join("ok.json").exists());
        assert!(!layout.root.join("x.md").exists());
        assert!(!layout.root.join("x.json").exists());
    }

    #[test]
    fn unauthorized_run_leaves_disk_untouched() {
        let temp = tempdir().expect("tempdir");
        let layout = BackupLayout::at(&temp.path().join("2024_07_03"));
        write_file(&layout.markdown_dir.join("old.md"), b"previous").expect("write");
        let mut api = MockApi::default();

        let error = run_backup_with_api(&mut api, &options(), &layout).expect_err("must fail");

        assert!(format!("{error:#}").contains("Unauthorized"));
        assert!(layout.markdown_dir.join("old.md").exists());
        assert_eq!(api.request_count, 1);
    }

    #[test]
    fn rerun_for_same_date_replaces_previous_output() {
        let temp = tempdir().expect("tempdir");
        let layout = BackupLayout::at(&temp.path().join("2024_07_03"));
        let mut api = sample_api();
        run_backup_with_api(&mut api, &options(), &layout).expect("first backup");
        write_file(&layout.markdown_dir.join("stale.md"), b"stale").expect("write");

        let mut api = sample_api();
        api.children.remove("a");
        api.children.get_mut("").expect("root").retain(|entry| entry.slug != "b");
        run_backup_with_api(&mut api, &options(), &layout).expect("second backup");

        assert!(!layout.markdown_dir.join("stale.md").exists());
        assert!(!layout.metadata_dir.join("b.json").exists());
        assert!(!layout.root.join("pages_metadata_flat").join("b.json").exists());
        assert!(layout.metadata_dir.join("a.json").exists());
    }
}
