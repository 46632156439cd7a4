// Regex-based HTML text helpers. These work on markup as a string and never
// fail on malformed input.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n\t ]+").unwrap());
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?([A-Za-z][A-Za-z0-9:\-]*)[^>]*>|<![^>]*>|<\?[^>]*>").unwrap()
});
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").unwrap()
});

/// Collapses runs of spaces, tabs and newlines into a single space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").into_owned()
}

/// Removes `<script>` and `<style>` elements together with their contents.
pub fn strip_script_and_style(html: &str) -> String {
    let html = SCRIPT.replace_all(html, "");
    STYLE.replace_all(&html, "").into_owned()
}

/// Removes comments and every tag whose name is not in `allowed`.
pub fn strip_tags(html: &str, allowed: &[&str]) -> String {
    let html = COMMENT.replace_all(html, "");
    TAG.replace_all(&html, |caps: &Captures| match caps.get(1) {
        Some(name) if allowed.iter().any(|a| a.eq_ignore_ascii_case(name.as_str())) => {
            caps[0].to_string()
        }
        _ => String::new(),
    })
    .into_owned()
}

/// Drops scripts, styles and all tags, then trims.
pub fn strip_all_tags(html: &str) -> String {
    strip_tags(&strip_script_and_style(html), &[])
        .trim()
        .to_string()
}

/// Escapes markup characters. Existing entities are left alone so already
/// escaped text is not double-encoded.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, ch) in input.char_indices() {
        match ch {
            '&' if ENTITY.is_match(&input[i..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Keeps the first `max_words` words and appends `more` when anything was cut.
pub fn trim_words(text: &str, max_words: usize, more: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}{}", words[..max_words].join(" "), more)
    } else {
        words.join(" ")
    }
}

/// Truncates to `max_chars` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\u{2026}", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tags_keeps_allowed() {
        let html = r#"<p>Hi <a href="/x">there</a> <b>you</b></p>"#;
        assert_eq!(strip_tags(html, &["a"]), r#"Hi <a href="/x">there</a> you"#);
        assert_eq!(strip_tags(html, &[]), "Hi there you");
    }

    #[test]
    fn test_strip_tags_removes_comments_and_doctype() {
        let html = "<!DOCTYPE html><!-- note --><div>text</div>";
        assert_eq!(strip_tags(html, &[]), "text");
    }

    #[test]
    fn test_strip_all_tags_drops_script_bodies() {
        let html = "<p>a</p><script>alert('x')</script><style>p{}</style><p>b</p> ";
        assert_eq!(strip_all_tags(html), "ab");
    }

    #[test]
    fn test_strip_tags_tolerates_unclosed_markup() {
        assert_eq!(strip_tags("<p>open <em>never closed", &[]), "open never closed");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#039;Jerry&#039;&lt;/b&gt;"
        );
        assert_eq!(escape_html("fish &amp; chips &#8230;"), "fish &amp; chips &#8230;");
    }

    #[test]
    fn test_trim_words() {
        assert_eq!(trim_words("one two three", 2, " …"), "one two …");
        assert_eq!(trim_words("one  two", 2, " …"), "one two");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 3), "hél…");
        assert_eq!(truncate_chars("hi", 3), "hi");
    }
}
