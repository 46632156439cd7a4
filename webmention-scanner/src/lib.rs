pub mod charset;
pub mod client;
pub mod context;
pub mod discovery;
pub mod error;
pub mod html;
pub mod links;
pub mod microformats;

pub use client::{FetchedPage, HttpClient, HttpConfig};
pub use context::extract_context;
pub use discovery::{Discoverer, LinkValue};
pub use error::ScanError;
pub use links::{extract_links, outgoing_targets};
pub use microformats::{HtmlMicroformats, MicroformatsParser, Mf2Document, Mf2Item, Mf2Value};
