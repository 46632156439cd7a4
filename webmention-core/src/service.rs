use crate::classify::Classifier;
use crate::config::Config;
use crate::error::Result;
use crate::hooks::Hooks;
use crate::host::Host;
use std::sync::Arc;
use webmention_scanner::{Discoverer, HtmlMicroformats, HttpClient, MicroformatsParser};

/// Ties a [`Host`] to the discovery, delivery, intake and processing engines.
pub struct MentionService<H: Host> {
    pub(crate) host: Arc<H>,
    pub(crate) config: Config,
    pub(crate) hooks: Hooks,
    pub(crate) http: HttpClient,
    pub(crate) discoverer: Discoverer,
    pub(crate) parser: Arc<dyn MicroformatsParser>,
    pub(crate) classifier: Classifier,
}

impl<H: Host> MentionService<H> {
    pub fn new(host: Arc<H>, config: Config) -> Result<Self> {
        let http = HttpClient::new(config.http.clone())?;
        let hooks = Hooks::default();

        Ok(Self {
            classifier: Classifier::new(&config, hooks.clone()),
            discoverer: Discoverer::new(http.clone()),
            parser: Arc::new(HtmlMicroformats),
            host,
            config,
            hooks,
            http,
        })
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.classifier = Classifier::new(&self.config, hooks.clone());
        self.hooks = hooks;
        self
    }

    /// Replaces the built-in microformats parser.
    pub fn with_parser(mut self, parser: Arc<dyn MicroformatsParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Post types that send and receive mentions, after hooks.
    pub fn supported_post_types(&self) -> Vec<String> {
        self.hooks.post_types(&self.config.post_types)
    }
}
