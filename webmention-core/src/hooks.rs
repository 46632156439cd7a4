// Extension points. Each hook is optional; when unset the documented
// default applies.

use crate::intake::IntakeRequest;
use crate::model::Post;
use std::sync::Arc;
use webmention_scanner::Mf2Item;

/// Rewrites the list of post types that send and receive mentions.
pub type PostTypesHook = Arc<dyn Fn(Vec<String>) -> Vec<String> + Send + Sync>;
/// Given the slug lookup result and the target URL, returns the post to attach to.
pub type ResolvePostHook = Arc<dyn Fn(Option<Post>, &str) -> Option<Post> + Send + Sync>;
/// Given the detected sender IP and the request, returns the IP to record.
pub type SenderIpHook = Arc<dyn Fn(String, &IntakeRequest) -> String + Send + Sync>;
/// Given derived comment content, the h-entry, source and target, returns final content.
pub type CommentContentHook = Arc<dyn Fn(String, &Mf2Item, &str, &str) -> String + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    post_types: Option<PostTypesHook>,
    resolve_post: Option<ResolvePostHook>,
    sender_ip: Option<SenderIpHook>,
    comment_content: Option<CommentContentHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post_types<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<String>) -> Vec<String> + Send + Sync + 'static,
    {
        self.post_types = Some(Arc::new(f));
        self
    }

    pub fn with_resolve_post<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<Post>, &str) -> Option<Post> + Send + Sync + 'static,
    {
        self.resolve_post = Some(Arc::new(f));
        self
    }

    pub fn with_sender_ip<F>(mut self, f: F) -> Self
    where
        F: Fn(String, &IntakeRequest) -> String + Send + Sync + 'static,
    {
        self.sender_ip = Some(Arc::new(f));
        self
    }

    pub fn with_comment_content<F>(mut self, f: F) -> Self
    where
        F: Fn(String, &Mf2Item, &str, &str) -> String + Send + Sync + 'static,
    {
        self.comment_content = Some(Arc::new(f));
        self
    }

    /// Defaults to `configured`.
    pub fn post_types(&self, configured: &[String]) -> Vec<String> {
        let types = configured.to_vec();
        match &self.post_types {
            Some(hook) => hook(types),
            None => types,
        }
    }

    /// Defaults to `found`.
    pub fn resolve_post(&self, found: Option<Post>, target: &str) -> Option<Post> {
        match &self.resolve_post {
            Some(hook) => hook(found, target),
            None => found,
        }
    }

    /// Defaults to `detected`.
    pub fn sender_ip(&self, detected: String, request: &IntakeRequest) -> String {
        match &self.sender_ip {
            Some(hook) => hook(detected, request),
            None => detected,
        }
    }

    /// Defaults to `content`.
    pub fn comment_content(
        &self,
        content: String,
        entry: &Mf2Item,
        source: &str,
        target: &str,
    ) -> String {
        match &self.comment_content {
            Some(hook) => hook(content, entry, source, target),
            None => content,
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("post_types", &self.post_types.is_some())
            .field("resolve_post", &self.resolve_post.is_some())
            .field("sender_ip", &self.sender_ip.is_some())
            .field("comment_content", &self.comment_content.is_some())
            .finish()
    }
}
