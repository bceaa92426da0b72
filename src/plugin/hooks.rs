//! Inputs and outputs of the asynchronous and content-producing hooks.

use std::sync::Arc;

use url::Url;

use super::KitchenContext;
use crate::content::Content;
use crate::error::Trace;
use crate::graph::{UrlSubtype, UrlType};

/// What a fetch hook is asked to load.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub context: Arc<KitchenContext>,
    pub url: Url,
    pub expected_type: Option<UrlType>,
    pub is_inline: bool,
    /// Content the parent supplied for an inline resource
    pub inline_content: Option<Content>,
    pub content_type: Option<String>,
    pub trace: Option<Trace>,
}

/// Bytes produced by a fetch hook, plus what it learned about them.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content: Content,
    pub content_type: Option<String>,
    /// Overrides classification from content type and references
    pub url_type: Option<UrlType>,
    pub subtype: Option<UrlSubtype>,
    pub headers: Vec<(String, String)>,
    pub filename_hint: Option<String>,
    pub sourcemap: Option<String>,
}

impl Fetched {
    pub fn new(content: impl Into<Content>) -> Self {
        Self {
            content: content.into(),
            content_type: None,
            url_type: None,
            subtype: None,
            headers: Vec::new(),
            filename_hint: None,
            sourcemap: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_type(mut self, url_type: UrlType) -> Self {
        self.url_type = Some(url_type);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_sourcemap(mut self, sourcemap: Option<String>) -> Self {
        self.sourcemap = sourcemap;
        self
    }
}

/// Replacement content returned by a transform or finalize hook.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub content: Content,
    pub sourcemap: Option<String>,
}

impl TransformOutput {
    pub fn new(content: impl Into<Content>) -> Self {
        Self {
            content: content.into(),
            sourcemap: None,
        }
    }

    pub fn with_sourcemap(mut self, sourcemap: impl Into<String>) -> Self {
        self.sourcemap = Some(sourcemap.into());
        self
    }
}

/// What a finalize hook is asked to post-process.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub context: Arc<KitchenContext>,
    pub url: Url,
    pub url_type: Option<UrlType>,
    pub content: Content,
    pub sourcemap: Option<String>,
}
