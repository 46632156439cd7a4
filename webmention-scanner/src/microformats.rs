// Microformats2 document model and a built-in HTML parser for the subset
// needed to read h-entry, h-feed and h-card markup.
//
// The model serializes to the canonical mf2 JSON shape, so output from any
// external parser can be loaded with `Mf2Document::from_json`.

use crate::error::{Result, ScanError};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mf2Document {
    #[serde(default)]
    pub items: Vec<Mf2Item>,
}

impl Mf2Document {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ScanError::ParseError(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mf2Item {
    #[serde(rename = "type", default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<Mf2Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Mf2Item>,
    /// Set when the item is itself the value of a property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mf2Html {
    pub html: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mf2Value {
    Text(String),
    Html(Mf2Html),
    Item(Box<Mf2Item>),
}

impl Mf2Value {
    /// Plain text form: the string, the html's text value or the item's value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Mf2Value::Text(text) => Some(text.as_str()),
            Mf2Value::Html(html) => Some(html.value.as_str()),
            Mf2Value::Item(item) => item.value.as_deref(),
        }
    }

    pub fn as_html(&self) -> Option<&str> {
        match self {
            Mf2Value::Html(html) => Some(html.html.as_str()),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<&Mf2Item> {
        match self {
            Mf2Value::Item(item) => Some(item),
            _ => None,
        }
    }

    /// URL this value points at: a plain string, or a nested item's `url`
    /// property falling back to its value.
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Mf2Value::Text(text) => Some(text.as_str()),
            Mf2Value::Html(_) => None,
            Mf2Value::Item(item) => item.first_text("url").or(item.value.as_deref()),
        }
    }
}

impl Mf2Item {
    /// Matches `entry` against `h-entry`; the prefix is optional.
    pub fn has_type(&self, name: &str) -> bool {
        let name = name.strip_prefix("h-").unwrap_or(name);
        self.types
            .iter()
            .any(|t| t.strip_prefix("h-").unwrap_or(t) == name)
    }

    pub fn property(&self, name: &str) -> &[Mf2Value] {
        self.properties.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&Mf2Value> {
        self.property(name).first()
    }

    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.first(name).and_then(Mf2Value::as_text)
    }

    fn push(&mut self, name: &str, value: Mf2Value) {
        self.properties
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

/// Extracts microformats2 items from an HTML document.
pub trait MicroformatsParser: Send + Sync {
    fn parse(&self, html: &str, base_url: &Url) -> Mf2Document;
}

/// Built-in parser using `scraper`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMicroformats;

impl MicroformatsParser for HtmlMicroformats {
    fn parse(&self, html: &str, base_url: &Url) -> Mf2Document {
        let document = Html::parse_document(html);
        let base = document_base(&document, base_url);

        let mut items = Vec::new();
        let root = document.root_element();
        if !root_types(root).is_empty() {
            items.push(parse_item(root, &base));
        } else {
            find_roots(root, &base, &mut items);
        }

        Mf2Document { items }
    }
}

#[derive(Default)]
struct Seen {
    text_property: bool,
    url_property: bool,
    nested: bool,
}

fn document_base(document: &Html, base_url: &Url) -> Url {
    let base_selector = Selector::parse("base[href]").unwrap();
    document
        .select(&base_selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| base_url.join(href.trim()).ok())
        .unwrap_or_else(|| base_url.clone())
}

fn child_elements(element: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    element.children().filter_map(ElementRef::wrap)
}

fn root_types(element: ElementRef<'_>) -> Vec<String> {
    let mut types: Vec<String> = element
        .value()
        .classes()
        .filter(|c| is_mf2_name(c, "h-"))
        .map(str::to_string)
        .collect();
    types.sort();
    types.dedup();
    types
}

fn property_classes(element: ElementRef<'_>) -> Vec<(&str, &str)> {
    let mut props = Vec::new();
    for class in element.value().classes() {
        for prefix in ["p-", "u-", "dt-", "e-"] {
            if is_mf2_name(class, prefix) {
                props.push((prefix, &class[prefix.len()..]));
            }
        }
    }
    props
}

fn is_mf2_name(class: &str, prefix: &str) -> bool {
    class.strip_prefix(prefix).is_some_and(|rest| {
        !rest.is_empty()
            && rest
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    })
}

fn find_roots(element: ElementRef<'_>, base: &Url, items: &mut Vec<Mf2Item>) {
    for child in child_elements(element) {
        if root_types(child).is_empty() {
            find_roots(child, base, items);
        } else {
            items.push(parse_item(child, base));
        }
    }
}

fn parse_item(element: ElementRef<'_>, base: &Url) -> Mf2Item {
    let mut item = Mf2Item {
        types: root_types(element),
        ..Mf2Item::default()
    };
    let mut seen = Seen::default();

    collect_properties(element, base, &mut item, &mut seen);

    if !item.properties.contains_key("name")
        && !seen.text_property
        && !seen.nested
        && let Some(name) = implied_name(element)
    {
        item.push("name", Mf2Value::Text(name));
    }

    if !item.properties.contains_key("url")
        && !seen.url_property
        && !seen.nested
        && let Some(url) = implied_url(element, base)
    {
        item.push("url", Mf2Value::Text(url));
    }

    item
}

fn collect_properties(element: ElementRef<'_>, base: &Url, item: &mut Mf2Item, seen: &mut Seen) {
    for child in child_elements(element) {
        let props = property_classes(child);

        if !root_types(child).is_empty() {
            let nested = parse_item(child, base);
            seen.nested = true;

            if props.is_empty() {
                item.children.push(nested);
                continue;
            }

            for (prefix, name) in props {
                let mut value = nested.clone();
                value.value = Some(match prefix {
                    "u-" => nested
                        .first_text("url")
                        .map(str::to_string)
                        .unwrap_or_else(|| url_value(child, base)),
                    "p-" => nested
                        .first_text("name")
                        .map(str::to_string)
                        .unwrap_or_else(|| text_content(child)),
                    _ => text_content(child),
                });
                item.push(name, Mf2Value::Item(Box::new(value)));
            }
            continue;
        }

        for (prefix, name) in props {
            let value = match prefix {
                "p-" => {
                    seen.text_property = true;
                    Mf2Value::Text(text_value(child))
                }
                "u-" => {
                    seen.url_property = true;
                    Mf2Value::Text(url_value(child, base))
                }
                "dt-" => Mf2Value::Text(datetime_value(child)),
                _ => {
                    seen.text_property = true;
                    Mf2Value::Html(Mf2Html {
                        html: child.inner_html().trim().to_string(),
                        value: text_content(child),
                    })
                }
            };
            item.push(name, value);
        }

        collect_properties(child, base, item, seen);
    }
}

fn text_content(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn attr<'a>(element: ElementRef<'a>, name: &str) -> Option<&'a str> {
    element.value().attr(name)
}

fn text_value(element: ElementRef<'_>) -> String {
    let el = element.value();
    match el.name() {
        "abbr" | "link" if el.attr("title").is_some() => attr(element, "title"),
        "data" | "input" if el.attr("value").is_some() => attr(element, "value"),
        "img" | "area" if el.attr("alt").is_some() => attr(element, "alt"),
        _ => None,
    }
    .map(|v| v.trim().to_string())
    .unwrap_or_else(|| text_content(element))
}

fn url_value(element: ElementRef<'_>, base: &Url) -> String {
    let el = element.value();
    let raw = match el.name() {
        "a" | "area" | "link" => el.attr("href"),
        "img" | "audio" | "video" | "source" | "iframe" => el.attr("src"),
        "object" => el.attr("data"),
        _ => None,
    };

    match raw {
        Some(raw) => resolve(base, raw),
        None => match el.name() {
            "video" if el.attr("poster").is_some() => {
                resolve(base, el.attr("poster").unwrap_or_default())
            }
            "abbr" if el.attr("title").is_some() => {
                el.attr("title").unwrap_or_default().trim().to_string()
            }
            "data" | "input" if el.attr("value").is_some() => {
                el.attr("value").unwrap_or_default().trim().to_string()
            }
            _ => text_content(element),
        },
    }
}

fn datetime_value(element: ElementRef<'_>) -> String {
    let el = element.value();
    match el.name() {
        "time" | "ins" | "del" => el.attr("datetime"),
        "abbr" => el.attr("title"),
        "data" | "input" => el.attr("value"),
        _ => None,
    }
    .map(|v| v.trim().to_string())
    .unwrap_or_else(|| text_content(element))
}

fn resolve(base: &Url, raw: &str) -> String {
    base.join(raw.trim())
        .map(String::from)
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn implied_name(element: ElementRef<'_>) -> Option<String> {
    let el = element.value();
    let explicit = match el.name() {
        "img" | "area" => el.attr("alt"),
        "abbr" => el.attr("title"),
        _ => None,
    };
    let name = explicit
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| text_content(element));
    (!name.is_empty()).then_some(name)
}

fn implied_url(element: ElementRef<'_>, base: &Url) -> Option<String> {
    let el = element.value();
    if matches!(el.name(), "a" | "area")
        && let Some(href) = el.attr("href")
    {
        return Some(resolve(base, href));
    }

    // a single linked child that is not itself a microformat
    let mut links = child_elements(element).filter(|c| {
        matches!(c.value().name(), "a" | "area")
            && c.value().attr("href").is_some()
            && root_types(*c).is_empty()
    });
    match (links.next(), links.next()) {
        (Some(only), None) => only.value().attr("href").map(|href| resolve(base, href)),
        _ => None,
    }
}
