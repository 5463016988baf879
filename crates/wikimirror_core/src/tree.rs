use anyhow::{Context, Result};
use reqwest::Url;
use tracing::{debug, info};

use crate::client::{NavigationEntry, WikiApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationNode {
    pub slug: String,
    pub title: String,
    pub full_title: String,
    pub has_children: bool,
    pub children: Vec<NavigationNode>,
}

impl NavigationNode {
    /// Synthetic root; `has_children` forces the first fetch.
    pub fn root() -> Self {
        Self {
            slug: String::new(),
            title: String::new(),
            full_title: String::new(),
            has_children: true,
            children: Vec::new(),
        }
    }

    fn child_of(parent_full_title: &str, entry: NavigationEntry) -> Self {
        let full_title = child_full_title(parent_full_title, &entry.title);
        Self {
            slug: entry.slug,
            title: entry.title,
            full_title,
            has_children: entry.has_children,
            children: Vec::new(),
        }
    }

    /// Depth-first search by slug. The root matches the empty slug.
    pub fn find_by_slug(&self, slug: &str) -> Option<&NavigationNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.slug == slug {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Number of nodes below the root.
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += node.children.len();
            stack.extend(node.children.iter());
        }
        count
    }
}

/// `parent + " " + title-without-trailing-dots + "."`, no leading space at the first level.
pub fn child_full_title(parent_full_title: &str, title: &str) -> String {
    let own = format!("{}.", title.trim_end_matches('.'));
    if parent_full_title.is_empty() {
        own
    } else {
        format!("{parent_full_title} {own}")
    }
}

struct PendingLevel {
    node: NavigationNode,
    pending: std::vec::IntoIter<NavigationNode>,
    done: Vec<NavigationNode>,
}

fn open_level<A: WikiApi>(api: &mut A, node: NavigationNode) -> Result<PendingLevel> {
    let entries = api
        .open_navigation_node(&node.slug)
        .with_context(|| format!("failed to fetch children of `{}`", node.slug))?;
    debug!(slug = %node.slug, children = entries.len(), "opened navigation node");
    let children = entries
        .into_iter()
        .map(|entry| NavigationNode::child_of(&node.full_title, entry))
        .collect::<Vec<_>>();
    Ok(PendingLevel {
        node,
        done: Vec::with_capacity(children.len()),
        pending: children.into_iter(),
    })
}

/// Populate `node` and everything below it, one network call per node with children.
///
/// Uses an explicit stack of partially built levels, so depth is limited only by
/// memory. Requests are issued in pre-order: a node's children are requested when
/// the node is reached, siblings in server order. Any failure aborts the build.
pub fn build_tree<A: WikiApi>(api: &mut A, node: NavigationNode) -> Result<NavigationNode> {
    if !node.has_children {
        return Ok(node);
    }

    let mut stack = vec![open_level(api, node)?];
    loop {
        let Some(level) = stack.last_mut() else {
            unreachable!("navigation stack is never empty inside the loop");
        };
        match level.pending.next() {
            Some(child) if child.has_children => {
                let opened = open_level(api, child)?;
                stack.push(opened);
            }
            Some(leaf) => level.done.push(leaf),
            None => {
                let Some(finished) = stack.pop() else {
                    unreachable!("navigation stack is never empty inside the loop");
                };
                let mut completed = finished.node;
                completed.children = finished.done;
                match stack.last_mut() {
                    Some(parent) => parent.done.push(completed),
                    None => return Ok(completed),
                }
            }
        }
    }
}

/// Fetch the whole navigation tree starting at the synthetic root.
pub fn fetch_navigation_tree<A: WikiApi>(api: &mut A) -> Result<NavigationNode> {
    let tree = build_tree(api, NavigationNode::root())?;
    info!(nodes = tree.descendant_count(), "fetched navigation tree");
    Ok(tree)
}

/// Absolute page URL plus the slug it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocator {
    pub slug: String,
    pub url: String,
}

impl PageLocator {
    /// Textual join: the slug is kept verbatim (no percent-encoding) so that
    /// stripping the base gives back the tree key.
    pub fn new(base_url: &str, slug: &str) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("invalid wiki URL: {base_url}"))?;
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            slug.trim_start_matches('/')
        );
        Ok(Self {
            slug: slug.to_string(),
            url,
        })
    }

    /// URL with the base stripped; this is the key used for tree lookups and file paths.
    pub fn relative_slug<'a>(&'a self, base_url: &str) -> &'a str {
        self.url.strip_prefix(base_url).unwrap_or(&self.url)
    }

    /// URL with the base replaced by `/`.
    pub fn relative_url(&self, base_url: &str) -> String {
        self.url.replace(base_url, "/")
    }
}

/// Every page below the root in per-branch post-order: a child's whole subtree
/// precedes the child itself, siblings keep server order, the root is skipped.
pub fn extract_page_urls(tree: &NavigationNode, base_url: &str) -> Result<Vec<PageLocator>> {
    let mut locators = Vec::new();
    let mut stack: Vec<(&NavigationNode, usize)> = vec![(tree, 0)];
    while let Some((node, index)) = stack.pop() {
        if let Some(child) = node.children.get(index) {
            stack.push((node, index + 1));
            stack.push((child, 0));
        } else if !stack.is_empty() {
            locators.push(PageLocator::new(base_url, &node.slug)?);
        }
    }
    info!(pages = locators.len(), "found pages");
    Ok(locators)
}
