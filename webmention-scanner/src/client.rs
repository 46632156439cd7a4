use crate::charset::decode_body;
use crate::error::{Result, ScanError};
use reqwest::header::{CONTENT_TYPE, HeaderMap, LINK};
use reqwest::{Client, Response, redirect};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;
use url::{Host, Url};

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_REDIRECTS: usize = 20;
pub const DEFAULT_USER_AGENT: &str = "webmention/0.3 (+https://github.com/trapdoorsec/webmention)";

/// Limits applied to every fetch made on behalf of discovery and processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_body_bytes: usize,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Allow fetching loopback, private and link-local hosts.
    pub allow_private_hosts: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allow_private_hosts: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL, after redirects.
    pub url: Url,
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl FetchedPage {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn link_headers(&self) -> Vec<&str> {
        self.headers
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let max_redirects = config.max_redirects;
        let allow_private = config.allow_private_hosts;

        // Every hop is checked, not just the first URL
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects {
                attempt.error("too many redirects")
            } else if !allow_private && is_private_url(attempt.url()) {
                attempt.error("redirect to a non-public host")
            } else {
                attempt.follow()
            }
        });

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.div_ceil(2)))
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(policy)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Metadata-only fetch. The returned page has an empty body.
    pub async fn head(&self, url: &Url) -> Result<FetchedPage> {
        self.ensure_fetchable(url)?;
        debug!("HEAD {}", url);

        let response = self.client.head(url.clone()).send().await?;

        Ok(FetchedPage {
            url: response.url().clone(),
            status_code: response.status().as_u16(),
            headers: response.headers().clone(),
            body: String::new(),
        })
    }

    /// Full fetch, body capped at `max_body_bytes` and decoded to UTF-8.
    pub async fn get(&self, url: &Url) -> Result<FetchedPage> {
        self.ensure_fetchable(url)?;
        debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let final_url = response.url().clone();
        let status_code = response.status().as_u16();
        let headers = response.headers().clone();

        let bytes = self.read_limited(response).await?;
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let body = decode_body(&bytes, content_type);

        Ok(FetchedPage {
            url: final_url,
            status_code,
            headers,
            body,
        })
    }

    /// POSTs a urlencoded form and returns the response status. Any status
    /// counts as delivered; only transport failures are errors.
    pub async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<u16> {
        debug!("POST {}", url);

        let response = self.client.post(url.clone()).form(form).send().await?;
        Ok(response.status().as_u16())
    }

    async fn read_limited(&self, mut response: Response) -> Result<Vec<u8>> {
        let limit = self.config.max_body_bytes;
        let mut body = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            let remaining = limit - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                debug!("Response body truncated at {} bytes", limit);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    fn ensure_fetchable(&self, url: &Url) -> Result<()> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScanError::InvalidUrl(url.to_string()));
        }
        if !self.config.allow_private_hosts && is_private_url(url) {
            return Err(ScanError::BlockedHost(
                url.host_str().unwrap_or_default().to_string(),
            ));
        }
        Ok(())
    }
}

/// True for `localhost` and literal loopback, private, link-local or
/// unspecified addresses. Hostnames are not resolved.
pub fn is_private_url(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_private_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_private_ip(IpAddr::V6(ip)),
        None => true,
    }
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
