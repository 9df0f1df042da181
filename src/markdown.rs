//! Markdown image references: extraction and tag building.
//!
//! Content is never parsed into a document tree. References are located with
//! a single regex and later replaced as literal substrings, so every byte of
//! non-image text survives a rewrite untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Query parameter appended to URLs whose image could not be re-hosted.
pub const FAILURE_MARKER: &str = "cause=saveError!";

/// One `![caption](url)` occurrence in the content.
///
/// Two refs with the same `url` share a cache entry, but each is substituted
/// on its own since caption and markup may differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// The exact markup span as it appears in the content.
    pub markup: String,
    /// Image URL with surrounding whitespace and `<...>` removed.
    pub url: String,
    /// Alt text between the brackets.
    pub caption: String,
}

// `![alt](url)`, `![alt](<url>)` and `![alt](url "title")`. Alt text may not
// span lines; the URL may not contain whitespace.
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[(?P<caption>[^\]\n]*)\]\(\s*<?(?P<url>[^\s()<>]+)>?(?:\s+"[^"\n]*")?\s*\)"#)
        .unwrap()
});

/// Find every image reference in `text`, in order of appearance.
///
/// Pure and restartable: calling it twice on the same input yields the same
/// sequence.
pub fn extract_image_refs(text: &str) -> Vec<ImageRef> {
    RE_IMAGE
        .captures_iter(text)
        .map(|caps| ImageRef {
            markup: caps[0].to_string(),
            url: caps["url"].to_string(),
            caption: caps["caption"].to_string(),
        })
        .collect()
}

/// Build the canonical Markdown tag for an image.
pub fn image_tag(caption: &str, url: &str) -> String {
    format!("![{caption}]({url})")
}

/// Derive the deterministic "could not re-host" URL for `url`.
///
/// Idempotent: a URL that already carries the marker is returned as-is, so
/// re-processing failed content does not stack markers.
pub fn failure_url(url: &str) -> String {
    if is_failure_url(url) {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{FAILURE_MARKER}")
}

/// True if `url` was produced by [`failure_url`].
pub fn is_failure_url(url: &str) -> bool {
    url.contains(FAILURE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_in_order_with_captions() {
        let refs = extract_image_refs("intro ![a](http://ext/1.png) mid ![b](https://ext/2.jpg) end");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].caption, "a");
        assert_eq!(refs[0].url, "http://ext/1.png");
        assert_eq!(refs[0].markup, "![a](http://ext/1.png)");
        assert_eq!(refs[1].caption, "b");
        assert_eq!(refs[1].url, "https://ext/2.jpg");
    }

    #[test]
    fn no_images_yields_empty() {
        assert!(extract_image_refs("just [a link](http://x) and text").is_empty());
        assert!(extract_image_refs("").is_empty());
    }

    #[test]
    fn title_and_angle_brackets_are_stripped_from_url() {
        let refs = extract_image_refs(r#"![t](http://ext/a.png "A title") ![u](<http://ext/b.png>)"#);
        assert_eq!(refs[0].url, "http://ext/a.png");
        assert_eq!(refs[0].markup, r#"![t](http://ext/a.png "A title")"#);
        assert_eq!(refs[1].url, "http://ext/b.png");
    }

    #[test]
    fn empty_caption_is_allowed() {
        let refs = extract_image_refs("![](http://ext/x.gif)");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].caption, "");
    }

    #[test]
    fn duplicate_urls_are_distinct_refs() {
        let refs = extract_image_refs("![a](http://ext/1.png) ![b](http://ext/1.png)");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, refs[1].url);
        assert_ne!(refs[0].markup, refs[1].markup);
    }

    #[test]
    fn image_tag_format() {
        assert_eq!(image_tag("cap", "http://host/x.png"), "![cap](http://host/x.png)");
    }

    #[test]
    fn failure_url_appends_marker() {
        assert_eq!(
            failure_url("http://ext/1.png"),
            "http://ext/1.png?cause=saveError!"
        );
        assert_eq!(
            failure_url("http://ext/1.png?w=100"),
            "http://ext/1.png?w=100&cause=saveError!"
        );
    }

    #[test]
    fn failure_url_is_idempotent() {
        let once = failure_url("http://ext/1.png");
        assert_eq!(failure_url(&once), once);
        assert!(is_failure_url(&once));
    }
}
