//! References: edges of the graph as written in source.
//!
//! A reference is one occurrence of a specifier in a parent's content
//! (an `import`, an `href`, a `url()`). References live in an arena owned
//! by the graph and are addressed by [`ReferenceId`]; a node's
//! `references` list is replaced wholesale on every cook.

use std::fmt;
use std::ops::Range;

use serde::Serialize;
use url::Url;

use super::url_info::{InlineSite, UrlSubtype, UrlType};
use crate::content::Content;
use crate::error::Trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(u32);

impl ReferenceId {
    /// Id of a reference not yet stored in an arena.
    pub const PENDING: Self = Self(u32::MAX);

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().filter(|&i| i != u32::MAX).map(Self)
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Syntactic origin of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    EntryPoint,
    /// Dev-server request from a client
    Request,
    /// `src`/`href` attribute in markup
    MarkupAttribute,
    /// Body of an inline `<script>` or `<style>`
    MarkupInline,
    ScriptImport,
    ScriptDynamicImport,
    ScriptNewUrl,
    ScriptWorker,
    StyleImport,
    StyleUrl,
    ResourceHint,
    SourcemapComment,
    ImportMapEntry,
    /// Change-tracking only, never a dependency
    Implicit,
}

impl ReferenceKind {
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::ScriptDynamicImport)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EntryPoint => "entry_point",
            Self::Request => "request",
            Self::MarkupAttribute => "markup_attribute",
            Self::MarkupInline => "markup_inline",
            Self::ScriptImport => "script_import",
            Self::ScriptDynamicImport => "script_dynamic_import",
            Self::ScriptNewUrl => "script_new_url",
            Self::ScriptWorker => "script_worker",
            Self::StyleImport => "style_import",
            Self::StyleUrl => "style_url",
            Self::ResourceHint => "resource_hint",
            Self::SourcemapComment => "sourcemap_comment",
            Self::ImportMapEntry => "import_map_entry",
            Self::Implicit => "implicit",
        }
    }
}

/// How a generated specifier is escaped for the parent's syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escape {
    #[default]
    None,
    /// Inside a JSON string
    Json,
    /// Inside an HTML attribute value
    HtmlAttribute,
}

impl Escape {
    pub fn apply(self, specifier: &str) -> String {
        match self {
            Self::None => specifier.to_string(),
            Self::Json => specifier.replace('\\', "\\\\").replace('"', "\\\""),
            Self::HtmlAttribute => specifier
                .replace('&', "&amp;")
                .replace('"', "&quot;")
                .replace('<', "&lt;"),
        }
    }
}

/// One occurrence of a specifier in a parent's content.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id: ReferenceId,
    pub kind: ReferenceKind,
    /// Finer classification chosen by the scanner (`"script"`, `"link"`)
    pub subkind: Option<String>,
    pub specifier: String,
    /// Byte range of the specifier (or inline body) in the parent content
    pub specifier_span: Option<Range<usize>>,
    pub parent_url: Option<Url>,

    pub url: Option<Url>,
    pub generated_url: Option<Url>,
    pub generated_specifier: Option<String>,
    pub search_params: Vec<(String, String)>,

    pub expected_type: Option<UrlType>,
    pub expected_subtype: Option<UrlSubtype>,
    pub filename_hint: Option<String>,

    pub is_entry_point: bool,
    pub is_inline: bool,
    pub is_resource_hint: bool,
    pub is_implicit: bool,
    /// Added by a plugin rather than found in source
    pub injected: bool,
    /// Whether the target's version must show up in this specifier
    pub has_versioning_effect: bool,

    pub content: Option<Content>,
    pub content_type: Option<String>,
    pub inline_site: Option<InlineSite>,
    pub escape: Escape,
    pub trace: Trace,

    pub original: Option<ReferenceId>,
    pub prev: Option<ReferenceId>,
    pub superseded_by: Option<ReferenceId>,
}

impl Reference {
    pub fn new(kind: ReferenceKind, specifier: impl Into<String>) -> Self {
        Self {
            id: ReferenceId::PENDING,
            kind,
            subkind: None,
            specifier: specifier.into(),
            specifier_span: None,
            parent_url: None,
            url: None,
            generated_url: None,
            generated_specifier: None,
            search_params: Vec::new(),
            expected_type: None,
            expected_subtype: None,
            filename_hint: None,
            is_entry_point: kind == ReferenceKind::EntryPoint,
            is_inline: false,
            is_resource_hint: kind == ReferenceKind::ResourceHint,
            is_implicit: kind == ReferenceKind::Implicit,
            injected: false,
            has_versioning_effect: true,
            content: None,
            content_type: None,
            inline_site: None,
            escape: Escape::None,
            trace: Trace::default(),
            original: None,
            prev: None,
            superseded_by: None,
        }
    }

    pub fn with_parent(mut self, parent: &Url) -> Self {
        self.parent_url = Some(parent.clone());
        self
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.specifier_span = Some(span);
        self
    }

    pub fn with_subkind(mut self, subkind: impl Into<String>) -> Self {
        self.subkind = Some(subkind.into());
        self
    }

    pub fn expecting(mut self, url_type: UrlType) -> Self {
        self.expected_type = Some(url_type);
        self
    }

    pub fn expecting_subtype(mut self, subtype: UrlSubtype) -> Self {
        self.expected_subtype = Some(subtype);
        self
    }

    pub fn with_escape(mut self, escape: Escape) -> Self {
        self.escape = escape;
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_filename_hint(mut self, hint: impl Into<String>) -> Self {
        self.filename_hint = Some(hint.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<Content>, content_type: Option<&str>) -> Self {
        self.content = Some(content.into());
        self.content_type = content_type.map(str::to_owned);
        self
    }

    pub fn resource_hint(mut self) -> Self {
        self.is_resource_hint = true;
        self
    }

    pub fn implicit(mut self) -> Self {
        self.is_implicit = true;
        self
    }

    pub fn without_versioning_effect(mut self) -> Self {
        self.has_versioning_effect = false;
        self
    }

    /// Counts as a dependency edge of its parent.
    pub fn is_dependency(&self) -> bool {
        !self.is_resource_hint && !self.is_implicit
    }
}

// ============================================================================
// ReferenceArena
// ============================================================================

/// Storage for every live reference of a graph.
#[derive(Debug, Default)]
pub struct ReferenceArena {
    slots: Vec<Option<Reference>>,
    free: Vec<ReferenceId>,
    live: usize,
}

impl ReferenceArena {
    /// Store a reference and assign its id.
    pub fn alloc(&mut self, mut reference: Reference) -> ReferenceId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => match ReferenceId::from_index(self.slots.len()) {
                Some(id) => {
                    self.slots.push(None);
                    id
                }
                None => panic!("reference arena exhausted"),
            },
        };
        reference.id = id;
        self.slots[id.index()] = Some(reference);
        self.live += 1;
        id
    }

    pub fn get(&self, id: ReferenceId) -> Option<&Reference> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: ReferenceId) -> Option<&mut Reference> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Drop a reference; its id may be reused.
    pub fn release(&mut self, id: ReferenceId) {
        if let Some(slot) = self.slots.get_mut(id.index())
            && slot.take().is_some()
        {
            self.free.push(id);
            self.live -= 1;
        }
    }

    /// Record that `next` replaces `prev` (a redirection or rewrite).
    pub fn supersede(&mut self, prev: ReferenceId, next: ReferenceId) {
        let original = self.original_of(prev);
        if let Some(old) = self.get_mut(prev) {
            old.superseded_by = Some(next);
        }
        if let Some(new) = self.get_mut(next) {
            new.prev = Some(prev);
            new.original = Some(original);
        }
    }

    /// First reference of a supersede chain.
    pub fn original_of(&self, id: ReferenceId) -> ReferenceId {
        self.get(id).and_then(|r| r.original).unwrap_or(id)
    }

    /// Last reference of a supersede chain.
    pub fn last_of(&self, mut id: ReferenceId) -> ReferenceId {
        while let Some(next) = self.get(id).and_then(|r| r.superseded_by) {
            id = next;
        }
        id
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reference> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_release_reuses_ids() {
        let mut arena = ReferenceArena::default();
        let a = arena.alloc(Reference::new(ReferenceKind::ScriptImport, "./a.js"));
        let b = arena.alloc(Reference::new(ReferenceKind::ScriptImport, "./b.js"));
        assert_ne!(a, b);
        assert_eq!(arena.get(a).unwrap().id, a);
        assert_eq!(arena.len(), 2);

        arena.release(a);
        arena.release(a);
        assert_eq!(arena.len(), 1);
        assert!(arena.get(a).is_none());

        let c = arena.alloc(Reference::new(ReferenceKind::StyleUrl, "./c.png"));
        assert_eq!(c, a);
        assert_eq!(arena.get(c).unwrap().specifier, "./c.png");
    }

    #[test]
    fn test_supersede_chain() {
        let mut arena = ReferenceArena::default();
        let first = arena.alloc(Reference::new(ReferenceKind::ScriptImport, "./a.js"));
        let second = arena.alloc(Reference::new(ReferenceKind::ScriptImport, "./a.js"));
        let third = arena.alloc(Reference::new(ReferenceKind::ScriptImport, "./a.js"));
        arena.supersede(first, second);
        arena.supersede(second, third);

        assert_eq!(arena.last_of(first), third);
        assert_eq!(arena.original_of(third), first);
        assert_eq!(arena.get(third).unwrap().prev, Some(second));
    }

    #[test]
    fn test_kind_defaults() {
        let hint = Reference::new(ReferenceKind::ResourceHint, "./font.woff2");
        assert!(hint.is_resource_hint && !hint.is_dependency());
        let entry = Reference::new(ReferenceKind::EntryPoint, "index.html");
        assert!(entry.is_entry_point && entry.is_dependency());
        assert!(ReferenceKind::ScriptDynamicImport.is_dynamic());
    }

    #[test]
    fn test_escape() {
        assert_eq!(Escape::Json.apply("a\"b"), "a\\\"b");
        assert_eq!(Escape::HtmlAttribute.apply("/a?x=1&y=2"), "/a?x=1&amp;y=2");
        assert_eq!(Escape::None.apply("/a.js"), "/a.js");
    }
}
