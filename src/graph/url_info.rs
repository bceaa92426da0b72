//! Graph node: one resource and everything known about it.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use url::Url;

use super::reference::{Reference, ReferenceId};
use crate::content::Content;
use crate::error::{CookError, Trace};
use crate::utils::timestamp::Timestamp;

// ============================================================================
// Classification
// ============================================================================

/// What kind of resource a node holds; drives hook dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlType {
    Html,
    Css,
    JsClassic,
    JsModule,
    Json,
    Importmap,
    Sourcemap,
    Svg,
    Text,
    Other,
}

impl UrlType {
    pub const fn is_js(self) -> bool {
        matches!(self, Self::JsClassic | Self::JsModule)
    }

    /// Directory under the build assets dir for files of this type.
    pub const fn asset_dir(self) -> &'static str {
        match self {
            Self::JsClassic | Self::JsModule => "js",
            Self::Css => "css",
            Self::Json | Self::Importmap | Self::Sourcemap => "json",
            _ => "other",
        }
    }

    /// Extension used for inline resources of this type.
    pub const fn inline_extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::JsClassic | Self::JsModule => "js",
            Self::Json => "json",
            Self::Importmap => "importmap",
            Self::Sourcemap => "map",
            Self::Svg => "svg",
            Self::Text | Self::Other => "txt",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::JsClassic => "js_classic",
            Self::JsModule => "js_module",
            Self::Json => "json",
            Self::Importmap => "importmap",
            Self::Sourcemap => "sourcemap",
            Self::Svg => "svg",
            Self::Text => "text",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for UrlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSubtype {
    Worker,
    ServiceWorker,
    SharedWorker,
}

/// Progress of a node through the cook pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CookState {
    #[default]
    Unresolved,
    Fetched,
    Transformed,
    Finalized,
    Cooked,
}

/// Where an inline resource sits inside its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineSite {
    pub parent_url: Url,
    pub line: usize,
    pub column: usize,
}

// ============================================================================
// DataBag
// ============================================================================

/// Plugin-private per-node data, keyed by type.
#[derive(Default)]
pub struct DataBag(FxHashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl DataBag {
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.0.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.0.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        let boxed = self.0.remove(&TypeId::of::<T>())?;
        boxed.downcast().ok().map(|b| *b)
    }

    pub(crate) fn merge(&mut self, other: DataBag) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for DataBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataBag({} entries)", self.0.len())
    }
}

// ============================================================================
// UrlInfo
// ============================================================================

/// A node of the URL graph.
#[derive(Debug)]
pub struct UrlInfo {
    pub url: Url,
    /// URL this node had when first created (before any build redirection)
    pub original_url: Url,
    /// URL where transformed bytes conceptually live
    pub generated_url: Option<Url>,
    pub filename_hint: Option<String>,

    pub url_type: Option<UrlType>,
    pub subtype: Option<UrlSubtype>,
    pub content_type: Option<String>,
    pub original_content: Option<Content>,
    pub content: Option<Content>,
    pub sourcemap: Option<String>,
    pub original_content_etag: Option<String>,
    pub content_etag: Option<String>,
    /// Response headers provided by the fetch hook
    pub headers: Vec<(String, String)>,

    pub dependencies: FxHashSet<Url>,
    pub dependents: FxHashSet<Url>,
    /// URLs whose change invalidates this node without being dependencies
    pub implicit_urls: FxHashSet<Url>,
    /// References found in this node's content during its last cook
    pub references: Vec<ReferenceId>,

    pub is_entry_point: bool,
    /// Entry point only because a client asked for it before anything
    /// imported it; the first dependent takes that role over
    pub is_requested_entry: bool,
    pub is_inline: bool,
    pub inline_site: Option<InlineSite>,
    /// Content supplied by the parent for inline nodes
    pub inline_content: Option<Content>,
    pub should_handle: bool,
    /// Trace of the most recent reference resolving to this node
    pub trace: Option<Trace>,

    pub state: CookState,
    pub modified_timestamp: Option<Timestamp>,
    pub cook_started: Option<Timestamp>,
    pub error: Option<Arc<CookError>>,

    pub data: DataBag,
}

impl UrlInfo {
    pub fn new(url: Url) -> Self {
        Self {
            original_url: url.clone(),
            url,
            generated_url: None,
            filename_hint: None,
            url_type: None,
            subtype: None,
            content_type: None,
            original_content: None,
            content: None,
            sourcemap: None,
            original_content_etag: None,
            content_etag: None,
            headers: Vec::new(),
            dependencies: FxHashSet::default(),
            dependents: FxHashSet::default(),
            implicit_urls: FxHashSet::default(),
            references: Vec::new(),
            is_entry_point: false,
            is_requested_entry: false,
            is_inline: false,
            inline_site: None,
            inline_content: None,
            should_handle: true,
            trace: None,
            state: CookState::Unresolved,
            modified_timestamp: None,
            cook_started: None,
            error: None,
            data: DataBag::default(),
        }
    }

    /// Entry points and nodes with dependents are kept; everything else is prunable.
    pub fn is_used(&self) -> bool {
        self.is_entry_point || !self.dependents.is_empty()
    }

    /// Cooked, error-free, and not modified since the cook began.
    pub fn is_valid(&self) -> bool {
        if self.state != CookState::Cooked || self.error.is_some() {
            return false;
        }
        match (self.modified_timestamp, self.cook_started) {
            (Some(modified), Some(started)) => modified < started,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Etag combining original and final content hashes.
    ///
    /// Either half changing invalidates client caches: the original half
    /// tracks the source file, the content half tracks plugin output.
    pub fn etag(&self) -> Option<String> {
        let original = self.original_content_etag.as_deref()?;
        let content = self.content_etag.as_deref()?;
        Some(format!("\"{original}_{content}\""))
    }

    /// Mark as needing recomputation after a change at `timestamp`.
    pub(crate) fn invalidate(&mut self, timestamp: Timestamp) {
        self.modified_timestamp = Some(timestamp);
        if self.state == CookState::Cooked {
            self.state = CookState::Finalized;
        }
        self.error = None;
    }

    /// Copy what a resolving reference knows about its target.
    pub(crate) fn absorb(&mut self, reference: &Reference) {
        if reference.is_entry_point {
            self.is_entry_point = true;
            self.is_requested_entry = false;
        }
        if reference.is_inline {
            self.is_inline = true;
            self.inline_site = reference.inline_site.clone();
            self.inline_content = reference.content.clone();
            if reference.content_type.is_some() {
                self.content_type = reference.content_type.clone();
            }
        }
        if let Some(expected) = reference.expected_type
            && self.url_type.is_none_or(|current| current == UrlType::JsClassic && expected == UrlType::JsModule)
        {
            self.url_type = Some(expected);
        }
        if reference.expected_subtype.is_some() {
            self.subtype = reference.expected_subtype;
        }
        if self.filename_hint.is_none() {
            self.filename_hint = reference.filename_hint.clone();
        }
        self.trace = Some(reference.trace.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::reference::ReferenceKind;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_data_bag() {
        #[derive(Debug, PartialEq)]
        struct Marker(u8);

        let mut bag = DataBag::default();
        assert!(bag.get::<Marker>().is_none());
        bag.insert(Marker(1));
        bag.get_mut::<Marker>().unwrap().0 = 2;
        assert_eq!(bag.get::<Marker>(), Some(&Marker(2)));
        assert_eq!(bag.remove::<Marker>(), Some(Marker(2)));
        assert!(bag.is_empty());
    }

    #[test]
    fn test_is_valid_tracks_modification() {
        let mut info = UrlInfo::new(url("file:///a.js"));
        assert!(!info.is_valid());

        info.state = CookState::Cooked;
        info.cook_started = Some(10);
        assert!(info.is_valid());

        info.invalidate(20);
        assert!(!info.is_valid());

        info.state = CookState::Cooked;
        info.cook_started = Some(30);
        assert!(info.is_valid());
    }

    #[test]
    fn test_etag_requires_both_halves() {
        let mut info = UrlInfo::new(url("file:///a.js"));
        info.original_content_etag = Some("aaaa".into());
        assert_eq!(info.etag(), None);
        info.content_etag = Some("bbbb".into());
        assert_eq!(info.etag().as_deref(), Some("\"aaaa_bbbb\""));
    }

    #[test]
    fn test_absorb_upgrades_classic_to_module() {
        let mut info = UrlInfo::new(url("file:///a.js"));
        info.url_type = Some(UrlType::JsClassic);
        let reference = Reference::new(ReferenceKind::ScriptImport, "./a.js").expecting(UrlType::JsModule);
        info.absorb(&reference);
        assert_eq!(info.url_type, Some(UrlType::JsModule));

        let css = Reference::new(ReferenceKind::StyleUrl, "./a.js").expecting(UrlType::Css);
        info.absorb(&css);
        assert_eq!(info.url_type, Some(UrlType::JsModule));
    }
}
