use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Returns the `href` of every anchor in document order, duplicates kept.
///
/// Parsing is lenient: unclosed tags and broken entities never fail, the
/// result is whatever the parser could recover.
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]").unwrap();

    document
        .select(&link_selector)
        .filter_map(|element| element.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect()
}

/// Absolute http(s) links only, first occurrence wins.
pub fn outgoing_targets(links: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();

    links
        .iter()
        .filter(|link| {
            Url::parse(link)
                .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
                .unwrap_or(false)
        })
        .filter(|link| seen.insert(link.as_str()))
        .cloned()
        .collect()
}
