// Turns a parsed h-entry into comment fields for a given target

use crate::config::Config;
use crate::hooks::Hooks;
use crate::model::{CommentDraft, MentionKind};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use tracing::debug;
use url::Url;
use webmention_scanner::html::{strip_all_tags, trim_words};
use webmention_scanner::{Mf2Document, Mf2Item, Mf2Value, extract_context};

/// Content no longer than this is shown whole.
const FULL_CONTENT_CHARS: usize = 500;
const EXCERPT_WORDS: usize = 25;

pub const BOOKMARK_CONTENT: &str = "\u{2026} bookmarked this!";
pub const LIKE_CONTENT: &str = "\u{2026} liked this!";
pub const REPOST_CONTENT: &str = "\u{2026} reposted this!";

#[derive(Debug, Clone)]
pub struct Classifier {
    utc_offset: Duration,
    bridging_hosts: Vec<String>,
    hooks: Hooks,
}

impl Classifier {
    pub fn new(config: &Config, hooks: Hooks) -> Self {
        Self {
            utc_offset: Duration::seconds(config.utc_offset_secs()),
            bridging_hosts: config
                .bridging_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            hooks,
        }
    }

    /// Tries each top-level item in turn.
    pub fn classify_document(
        &self,
        document: &Mf2Document,
        source: &str,
        target: &str,
        defaults: &CommentDraft,
    ) -> Option<CommentDraft> {
        document
            .items
            .iter()
            .find_map(|item| self.classify(item, source, target, defaults))
    }

    /// Classifies an h-entry, or the first qualifying h-entry child of an
    /// h-feed. Returns `None` when nothing references `target`.
    pub fn classify(
        &self,
        item: &Mf2Item,
        source: &str,
        target: &str,
        defaults: &CommentDraft,
    ) -> Option<CommentDraft> {
        if item.has_type("feed") {
            return item
                .children
                .iter()
                .filter(|child| child.has_type("entry"))
                .find_map(|child| self.classify_entry(child, source, target, defaults));
        }

        if item.has_type("entry") {
            return self.classify_entry(item, source, target, defaults);
        }

        None
    }

    fn classify_entry(
        &self,
        entry: &Mf2Item,
        source: &str,
        target: &str,
        defaults: &CommentDraft,
    ) -> Option<CommentDraft> {
        let Some(kind) = relationship(entry, target) else {
            debug!("Entry on {} does not reference {}", source, target);
            return None;
        };

        let mut draft = defaults.clone();
        draft.kind = Some(kind);

        if let Some(author) = entry.first("author") {
            match author {
                Mf2Value::Item(card) => {
                    if let Some(name) = card.first_text("name").filter(|n| !n.is_empty()) {
                        draft.author_name = name.to_string();
                    }
                    if let Some(url) = card.first("url").and_then(Mf2Value::as_url) {
                        draft.author_url = url.to_string();
                    }
                }
                Mf2Value::Text(name) if !name.is_empty() => draft.author_name = name.clone(),
                _ => {}
            }
        }

        if let Some(published) = entry.first_text("published").and_then(parse_published) {
            let (local, utc) = if self.is_bridging_host(source) {
                (published + self.utc_offset, published)
            } else {
                (published, published - self.utc_offset)
            };
            draft.date_local = local;
            draft.date_utc = utc;
        }

        if let Some(url) = entry.first("url").and_then(Mf2Value::as_url)
            && Url::parse(url).is_ok()
        {
            draft.source_url = Some(url.to_string());
        }

        let content = match kind {
            MentionKind::Bookmark => BOOKMARK_CONTENT.to_string(),
            MentionKind::Like => LIKE_CONTENT.to_string(),
            MentionKind::Repost => REPOST_CONTENT.to_string(),
            MentionKind::Mention | MentionKind::Reply => {
                derive_text(entry, target).unwrap_or_else(|| draft.content.clone())
            }
        };
        draft.content = self.hooks.comment_content(content, entry, source, target);

        Some(draft)
    }

    fn is_bridging_host(&self, source: &str) -> bool {
        let Some(host) = Url::parse(source)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        self.bridging_hosts.iter().any(|b| host.contains(b.as_str()))
    }
}

/// Relationship kind, evaluated in increasing precedence so the last match wins.
pub fn relationship(entry: &Mf2Item, target: &str) -> Option<MentionKind> {
    let mut kind = None;

    let content_html = entry.first("content").and_then(Mf2Value::as_html);
    if content_html.is_some_and(|html| contains_ignore_case(html, target)) {
        kind = Some(MentionKind::Mention);
    }

    for (property, candidate) in [
        ("in-reply-to", MentionKind::Reply),
        ("repost-of", MentionKind::Repost),
        ("bookmark-of", MentionKind::Bookmark),
        ("like-of", MentionKind::Like),
    ] {
        if references(entry, property, target) {
            kind = Some(candidate);
        }
    }

    kind
}

fn references(entry: &Mf2Item, property: &str, target: &str) -> bool {
    entry
        .property(property)
        .iter()
        .filter_map(Mf2Value::as_url)
        .any(|url| url == target)
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_lowercase()
        .contains(&needle.to_lowercase())
}

/// Whole content when short, else the context around the link, else the
/// first 25 words.
fn derive_text(entry: &Mf2Item, target: &str) -> Option<String> {
    let content = entry.first("content")?;
    let html = content.as_html().filter(|h| !h.is_empty());
    let value = content.as_text().unwrap_or_default();

    if let Some(html) = html
        && !value.is_empty()
        && value.chars().count() <= FULL_CONTENT_CHARS
    {
        return Some(strip_all_tags(html));
    }

    let html = html?;
    let context = extract_context(html, target);
    if !context.is_empty() {
        return Some(context);
    }

    Some(trim_words(&strip_all_tags(html), EXCERPT_WORDS, " \u{2026}"))
}

/// Published time as a naive UTC value. Values without an offset are taken
/// as written.
pub fn parse_published(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, format) {
            return Some(dt.naive_utc());
        }
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
