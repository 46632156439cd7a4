// Excerpt of the paragraph around a link, for comment bodies

use crate::html::{
    collapse_whitespace, escape_html, strip_script_and_style, strip_tags, truncate_chars,
};
use regex::Regex;
use std::sync::LazyLock;

const CONTEXT_CHARS: usize = 200;
const LINK_TEXT_CHARS: usize = 100;
const MARKER: &str = "mentionctx";

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:h[1-6]|p|th|td|li|dt|dd|pre|caption|input|textarea|button|body)\b[^>]*>")
        .unwrap()
});

/// Finds the first paragraph of `html` containing an anchor whose opening
/// tag mentions `target`, and returns up to 200 characters either side of
/// the link text as `[… text …]`. Returns an empty string when no such
/// anchor exists.
pub fn extract_context(html: &str, target: &str) -> String {
    if target.is_empty() {
        return String::new();
    }

    let html = collapse_whitespace(html);
    let html = BLOCK_TAG.replace_all(&html, "\n\n");
    let html = strip_tags(&strip_script_and_style(&html), &["a"]);

    let anchor = match Regex::new(&format!(
        r"<[aA]\b[^>]*?{}[^>]*>([^<>]*?)</[aA]\s*>",
        regex::escape(target)
    )) {
        Ok(re) => re,
        Err(_) => return String::new(),
    };

    for paragraph in html.split("\n\n") {
        if !paragraph.contains(target) {
            continue;
        }
        let Some(caps) = anchor.captures(paragraph) else {
            continue;
        };

        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        let link_text = truncate_chars(caps[1].trim(), LINK_TEXT_CHARS);

        let marked = format!(
            "{}<{MARKER}>{}</{MARKER}>{}",
            &paragraph[..whole.start],
            link_text,
            &paragraph[whole.end..]
        );
        let marked = strip_tags(&marked, &[MARKER]);

        let excerpt = narrow_around_marker(marked.trim());
        let excerpt = collapse_whitespace(&strip_tags(&excerpt, &[]));
        let excerpt = excerpt.trim();
        if excerpt.is_empty() {
            return String::new();
        }

        return format!("[\u{2026} {} \u{2026}]", escape_html(excerpt));
    }

    String::new()
}

/// Keeps the marked link text plus up to `CONTEXT_CHARS` on each side,
/// cutting only at word boundaries.
fn narrow_around_marker(text: &str) -> String {
    let open = format!("<{MARKER}>");
    let close = format!("</{MARKER}>");

    let (Some(start), Some(end)) = (text.find(&open), text.find(&close)) else {
        return text.to_string();
    };

    let before = &text[..start];
    let inner = &text[start + open.len()..end];
    let after = &text[end + close.len()..];

    format!("{}{}{}", tail_words(before), inner, head_words(after))
}

fn tail_words(text: &str) -> &str {
    let count = text.chars().count();
    if count <= CONTEXT_CHARS {
        return text;
    }
    let cut = text
        .char_indices()
        .nth(count - CONTEXT_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[cut..];
    // drop the partial word at the front
    match tail.find(char::is_whitespace) {
        Some(i) => &tail[i..],
        None => "",
    }
}

fn head_words(text: &str) -> &str {
    let Some((cut, _)) = text.char_indices().nth(CONTEXT_CHARS) else {
        return text;
    };
    let head = &text[..cut];
    match head.rfind(char::is_whitespace) {
        Some(i) => &head[..i],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_around_link() {
        let html = r#"<p>Check <a href="https://t/x">my post</a> out</p>"#;
        assert_eq!(extract_context(html, "https://t/x"), "[… Check my post out …]");
    }

    #[test]
    fn test_context_picks_paragraph_with_link() {
        let html = r#"
            <h1>Title</h1>
            <p>Nothing to see here.</p>
            <p>I <em>really</em> liked <a class="u-in-reply-to" href="https://b.example/post">this post</a>, thanks.</p>
            <p>Another <a href="https://elsewhere.example/">link</a>.</p>"#;

        assert_eq!(
            extract_context(html, "https://b.example/post"),
            "[… I really liked this post, thanks. …]"
        );
    }

    #[test]
    fn test_context_empty_without_anchor() {
        let html = "<p>Plain mention of https://b.example/post without a link.</p>";
        assert_eq!(extract_context(html, "https://b.example/post"), "");
        assert_eq!(extract_context("", "https://b.example/post"), "");
    }

    #[test]
    fn test_context_escapes_text() {
        let html = r#"<p>Tom & Jerry say <a href="https://t/x">hi</a> <b>"loudly"</b></p>"#;
        assert_eq!(
            extract_context(html, "https://t/x"),
            "[… Tom &amp; Jerry say hi &quot;loudly&quot; …]"
        );
    }

    #[test]
    fn test_context_narrows_long_paragraphs() {
        let filler = "word ".repeat(100);
        let html = format!(
            r#"<p>{}start <a href="https://t/x">the link</a> end {}</p>"#,
            filler, filler
        );

        let context = extract_context(&html, "https://t/x");
        assert!(context.starts_with("[… word"));
        assert!(context.contains("start the link end"));
        assert!(context.ends_with("word …]"));
        // 200 each side plus the link text and the wrapper
        assert!(context.chars().count() < 200 * 2 + 40);
    }

    #[test]
    fn test_context_truncates_long_link_text() {
        let text = "x".repeat(150);
        let html = format!(r#"<p><a href="https://t/x">{}</a></p>"#, text);
        let context = extract_context(&html, "https://t/x");
        assert_eq!(context, format!("[… {}… …]", "x".repeat(100)));
    }
}
