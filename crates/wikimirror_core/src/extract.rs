//! Best-effort field extraction from page responses.
//!
//! Page bodies are an HTML shell with embedded JSON state. Nothing here
//! parses that structure; each field is a named pattern whose first capture
//! group is the value. Orchestration only talks to [`PageExtractor`], so a
//! different strategy can be dropped in without touching the pipeline.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static RE_CONTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""content":"(.*?)","owner":"#).expect("valid content pattern"));
static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<title>(.*?) \| Wiki</title>").expect("valid title pattern"));
static RE_USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""username":"(.*?)""#).expect("valid username pattern"));
static RE_DISPLAY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""display_name":"(.*?)""#).expect("valid display_name pattern")
});
static RE_CREATED_AT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""created_at":"(.*?)""#).expect("valid created_at pattern"));
static RE_ORG_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""collabOrgId":"(.*?)""#).expect("valid org id pattern"));

/// A single named field pattern.
pub struct FieldPattern {
    pub name: &'static str,
    regex: &'static LazyLock<Regex>,
}

impl FieldPattern {
    pub fn find(&self, body: &str) -> Option<String> {
        let found = self
            .regex
            .captures(body)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str().to_string());
        if found.is_none() {
            debug!(field = self.name, "pattern did not match");
        }
        found
    }
}

pub static CONTENT: FieldPattern = FieldPattern {
    name: "content",
    regex: &RE_CONTENT,
};
pub static TITLE: FieldPattern = FieldPattern {
    name: "title",
    regex: &RE_TITLE,
};
pub static USERNAME: FieldPattern = FieldPattern {
    name: "username",
    regex: &RE_USERNAME,
};
pub static DISPLAY_NAME: FieldPattern = FieldPattern {
    name: "display_name",
    regex: &RE_DISPLAY_NAME,
};
pub static CREATED_AT: FieldPattern = FieldPattern {
    name: "created_at",
    regex: &RE_CREATED_AT,
};
pub static ORG_ID: FieldPattern = FieldPattern {
    name: "collabOrgId",
    regex: &RE_ORG_ID,
};

/// Fields read from a page body for its metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageFields {
    pub title: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub created_at: Option<String>,
}

pub trait PageExtractor {
    /// Raw content payload, still in the server's escaped form.
    fn content(&self, body: &str) -> Option<String>;
    fn fields(&self, body: &str) -> PageFields;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl PageExtractor for PatternExtractor {
    fn content(&self, body: &str) -> Option<String> {
        CONTENT.find(body)
    }

    fn fields(&self, body: &str) -> PageFields {
        PageFields {
            title: TITLE.find(body),
            username: USERNAME.find(body),
            display_name: DISPLAY_NAME.find(body),
            created_at: CREATED_AT.find(body),
        }
    }
}

/// Rewrite absolute links to root-relative ones and unescape `\n`.
pub fn format_content(raw: &str, base_url: &str) -> String {
    raw.replace(base_url, "/").replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = concat!(
        "<html><head><title>Onboarding | Wiki</title></head><body><script>",
        r##"{"page":{"content":"# Hello\nSee https://wiki.example.org/docs/img.png","owner":{"##,
        r#""username":"jdoe","display_name":"Jane Doe"},"created_at":"2024-05-01T10:00:00Z"}}"#,
        "</script></body></html>"
    );

    #[test]
    fn pattern_extractor_reads_every_field() {
        let fields = PatternExtractor.fields(PAGE);
        assert_eq!(fields.title.as_deref(), Some("Onboarding"));
        assert_eq!(fields.username.as_deref(), Some("jdoe"));
        assert_eq!(fields.display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(fields.created_at.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn missing_fields_are_none_independently() {
        let fields = PatternExtractor.fields(r#"<title>Only title | Wiki</title>"#);
        assert_eq!(fields.title.as_deref(), Some("Only title"));
        assert!(fields.username.is_none());
        assert!(fields.display_name.is_none());
        assert!(fields.created_at.is_none());
    }

    #[test]
    fn content_requires_owner_marker() {
        assert_eq!(
            PatternExtractor.content(PAGE).as_deref(),
            Some(r"# Hello\nSee https://wiki.example.org/docs/img.png")
        );
        assert!(
            PatternExtractor
                .content(r#"{"content":"orphan text"}"#)
                .is_none()
        );
    }

    #[test]
    fn content_match_is_lazy() {
        let body = r#"{"content":"first","owner":1}{"content":"second","owner":2}"#;
        assert_eq!(PatternExtractor.content(body).as_deref(), Some("first"));
    }

    #[test]
    fn format_content_rewrites_base_and_newlines() {
        let raw = r"line one\nsee https://wiki.example.org/files/a.png\nend";
        assert_eq!(
            format_content(raw, "https://wiki.example.org/"),
            "line one\nsee /files/a.png\nend"
        );
    }

    #[test]
    fn org_id_pattern_reads_first_match() {
        let body = r#"window.__DATA__={"collabOrgId":"org-42","other":"x"}"#;
        assert_eq!(ORG_ID.find(body).as_deref(), Some("org-42"));
        assert_eq!(ORG_ID.name, "collabOrgId");
        assert!(ORG_ID.find("<html></html>").is_none());
    }
}
