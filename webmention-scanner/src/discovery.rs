use crate::client::{FetchedPage, HttpClient};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

const BINARY_MEDIA: [&str; 4] = ["image/", "audio/", "video/", "model/"];

/// One entry of an HTTP `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkValue {
    pub uri: String,
    pub rels: Vec<String>,
}

/// Resolves a URL to the Webmention endpoint that receives notifications for it.
#[derive(Clone)]
pub struct Discoverer {
    http: HttpClient,
}

impl Discoverer {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Returns the absolute endpoint URL, or `None` when the target does not
    /// advertise one or cannot be fetched.
    ///
    /// Link headers from a HEAD request are checked first. Binary media
    /// responses stop there; anything else is fetched in full and searched
    /// for `<link>` or `<a>` elements with a `webmention` rel.
    pub async fn discover(&self, url: &str) -> Option<Url> {
        let url = Url::parse(url).ok()?;
        if url.host_str().is_none() {
            return None;
        }

        let head = match self.http.head(&url).await {
            Ok(page) => page,
            Err(e) => {
                debug!("HEAD {} failed: {}", url, e);
                return None;
            }
        };

        if let Some(endpoint) = endpoint_from_page_headers(&head) {
            debug!("Endpoint for {} found in Link header: {}", url, endpoint);
            return Some(endpoint);
        }

        if head.content_type().is_some_and(is_binary_media) {
            debug!("{} is binary media, not searching body", url);
            return None;
        }

        let page = match self.http.get(&url).await {
            Ok(page) => page,
            Err(e) => {
                debug!("GET {} failed: {}", url, e);
                return None;
            }
        };

        let endpoint = endpoint_from_page_headers(&page)
            .or_else(|| endpoint_from_html(&page.body, &page.url));
        debug!("Endpoint for {}: {:?}", url, endpoint.as_ref().map(Url::as_str));
        endpoint
    }
}

fn endpoint_from_page_headers(page: &FetchedPage) -> Option<Url> {
    page.link_headers()
        .into_iter()
        .find_map(|header| endpoint_from_link_header(header, &page.url))
}

/// First `Link` header entry with a Webmention rel, resolved against `base`.
pub fn endpoint_from_link_header(header: &str, base: &Url) -> Option<Url> {
    parse_link_header(header)
        .into_iter()
        .find(|link| link.rels.iter().any(|rel| is_webmention_rel(rel)))
        .and_then(|link| base.join(&link.uri).ok())
}

/// First `<link>` or `<a>` whose rel names Webmention, resolved against `base`.
pub fn endpoint_from_html(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("link[rel][href], a[rel][href]").unwrap();

    document
        .select(&selector)
        .find(|element| {
            let rel = element.value().attr("rel").unwrap_or_default();
            rel.split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("webmention"))
                || rel.to_ascii_lowercase().contains("webmention.org")
        })
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| base.join(href.trim()).ok())
}

/// Splits a `Link` header into its entries. Commas and semicolons inside
/// quotes or angle brackets do not split.
pub fn parse_link_header(header: &str) -> Vec<LinkValue> {
    split_outside_quotes(header, ',')
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.trim();
            let start = entry.find('<')?;
            let end = start + entry[start..].find('>')?;
            let uri = entry[start + 1..end].trim().to_string();

            let rels = split_outside_quotes(&entry[end + 1..], ';')
                .into_iter()
                .filter_map(|param| {
                    let (key, value) = param.split_once('=')?;
                    key.trim().eq_ignore_ascii_case("rel").then(|| {
                        value
                            .trim()
                            .trim_matches(|c| c == '"' || c == '\'')
                            .to_string()
                    })
                })
                .flat_map(|value| {
                    value
                        .split_ascii_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .collect();

            Some(LinkValue { uri, rels })
        })
        .collect()
}

fn split_outside_quotes(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut start = 0;

    for (i, ch) in input.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_brackets = true,
            '>' if !in_quotes => in_brackets = false,
            c if c == separator && !in_quotes && !in_brackets => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// `webmention` or `webmention.org`, with or without scheme and trailing slash.
pub fn is_webmention_rel(rel: &str) -> bool {
    let rel = rel.trim().to_ascii_lowercase();
    let rel = rel
        .strip_prefix("https://")
        .or_else(|| rel.strip_prefix("http://"))
        .unwrap_or(&rel);
    let rel = rel.trim_end_matches('/');
    rel == "webmention" || rel == "webmention.org"
}

fn is_binary_media(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    BINARY_MEDIA
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}
