use crate::error::{Error, Result};
use crate::host::Host;
use crate::model::{NewMention, Post};
use crate::service::MentionService;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

/// An incoming notification as received by the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeRequest {
    pub source: Option<String>,
    pub target: Option<String>,
    /// Socket peer address.
    pub remote_addr: Option<String>,
    /// Raw X-Forwarded-For / X-Real-IP value, if the server trusts it.
    pub forwarded_for: Option<String>,
}

impl IntakeRequest {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// First address of the forwarded chain, else the peer address.
    pub fn detected_ip(&self) -> String {
        self.forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .or(self.remote_addr.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

/// `<link>` tag advertising the intake endpoint.
pub fn advertisement_link(endpoint_url: &str) -> String {
    format!(
        r#"<link rel="webmention" href="{}" />"#,
        webmention_scanner::html::escape_html(endpoint_url)
    )
}

/// Keeps hex digits, dots, colons, commas and spaces.
pub fn sanitize_ip(ip: &str) -> String {
    ip.chars()
        .filter(|c| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | ',' | ' '))
        .collect()
}

fn require_url(value: Option<&str>, field: &str) -> Result<Url> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidRequest(format!("missing {}", field)))?;

    let url = Url::parse(value)
        .map_err(|_| Error::InvalidRequest(format!("{} is not a valid URL", field)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::InvalidRequest(format!("{} is not a valid URL", field)));
    }
    Ok(url)
}

/// Last path segment once the configured prefix is removed.
pub fn slug_from_path(path: &str, path_prefix: &str) -> String {
    let prefix = path_prefix.trim_matches('/');
    let mut path = path.trim_matches('/');

    if !prefix.is_empty()
        && let Some(rest) = path.strip_prefix(prefix)
        && (rest.is_empty() || rest.starts_with('/'))
    {
        path = rest.trim_matches('/');
    }

    path.rsplit('/').next().unwrap_or_default().to_string()
}

impl<H: Host> MentionService<H> {
    /// Validates a notification and queues it. Fetching the source happens
    /// later, in [`MentionService::process_queue`].
    pub fn receive(&self, request: &IntakeRequest) -> Result<i64> {
        let source = require_url(request.source.as_deref(), "source")?;
        let target = require_url(request.target.as_deref(), "target")?;

        let post = self
            .resolve_target(&target)?
            .ok_or_else(|| Error::NotFound(format!("no post for {}", target)))?;

        let detected = request.detected_ip();
        let ip = sanitize_ip(&self.hooks.sender_ip(detected, request));

        let id = self.host.insert_mention(&NewMention {
            source: source.to_string(),
            target: target.to_string(),
            post_id: post.id,
            ip,
            created_at: self.host.now(),
        })?;

        info!(mention_id = id, source = %source, target = %target, "Mention queued");
        Ok(id)
    }

    /// Published post of a supported type that `target` points at.
    fn resolve_target(&self, target: &Url) -> Result<Option<Post>> {
        let slug = slug_from_path(target.path(), &self.config.path_prefix);
        let post_types = self.supported_post_types();

        let found = if slug.is_empty() {
            None
        } else {
            self.host.find_post_by_slug(&slug, &post_types)?
        };

        let post = self
            .hooks
            .resolve_post(found, target.as_str())
            .filter(|post| post.is_published() && post_types.contains(&post.post_type));

        if post.is_none() {
            debug!("No published post for slug {:?} ({})", slug, target);
        }
        Ok(post)
    }
}
