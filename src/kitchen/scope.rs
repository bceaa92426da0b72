//! What transform and cooked hooks get to work with.

use std::any::Any;
use std::ops::Range;

use url::Url;

use super::Kitchen;
use crate::content::Content;
use crate::error::{CookError, Trace};
use crate::graph::{DataBag, InlineSite, PruneCallback, PruneEvent, Reference, ReferenceId, UrlInfo, UrlType};
use crate::plugin::KitchenContext;
use crate::utils::urls;

/// A pending edit of the content being transformed.
#[derive(Debug, Clone)]
pub(crate) enum Replacement {
    /// The generated specifier of a reference
    Specifier(ReferenceId),
    /// The cooked content of an inline resource
    Inline(Url),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Rewrite {
    pub span: Range<usize>,
    pub replacement: Replacement,
}

/// Everything a transform hook produced besides its return value.
#[derive(Debug, Default)]
pub(crate) struct Findings {
    pub references: Vec<ReferenceId>,
    pub inline: Vec<Url>,
    pub rewrites: Vec<Rewrite>,
    pub errors: Vec<CookError>,
    pub data: DataBag,
}

// ============================================================================
// TransformScope
// ============================================================================

/// Handle given to transform hooks for one resource.
///
/// Hooks read the current content, report the references they find, and
/// either return new content or let the kitchen splice generated
/// specifiers into the spans they reported.
pub struct TransformScope<'k> {
    kitchen: &'k Kitchen,
    url: &'k Url,
    url_type: UrlType,
    content: &'k Content,
    findings: Findings,
}

impl<'k> TransformScope<'k> {
    pub(crate) fn new(kitchen: &'k Kitchen, url: &'k Url, url_type: UrlType, content: &'k Content) -> Self {
        Self {
            kitchen,
            url,
            url_type,
            content,
            findings: Findings::default(),
        }
    }

    pub fn url(&self) -> &'k Url {
        self.url
    }

    pub fn url_type(&self) -> UrlType {
        self.url_type
    }

    pub fn content(&self) -> &'k Content {
        self.content
    }

    /// Content as text, if it is text.
    pub fn text(&self) -> Option<&'k str> {
        self.content.as_text()
    }

    pub fn context(&self) -> &'k KitchenContext {
        &self.kitchen.context
    }

    /// Trace pointing at byte `offset` of the current content.
    pub fn trace_at(&self, offset: usize) -> Trace {
        match self.text() {
            Some(text) => Trace::at(self.url, text, offset),
            None => Trace::url(self.url),
        }
    }

    /// Report a reference found in the content.
    ///
    /// When it carries a span, the span is replaced by the generated
    /// specifier unless the hook returns its own content. Resolution
    /// failures are collected and fail the cook once the hook returns.
    pub fn found(&mut self, reference: Reference) -> Option<ReferenceId> {
        let reference = self.adopt(reference);
        let span = reference.specifier_span.clone();
        let id = self.resolve(reference)?;
        if let Some(span) = span {
            self.findings.rewrites.push(Rewrite {
                span,
                replacement: Replacement::Specifier(id),
            });
        }
        Some(id)
    }

    /// Report an inline resource whose body occupies `reference.specifier_span`.
    ///
    /// The body becomes its own node, cooked before this hook's edits are
    /// applied, and the span is replaced by its cooked content.
    pub fn found_inline(&mut self, mut reference: Reference) -> Option<ReferenceId> {
        let span = reference.specifier_span.clone().unwrap_or(0..0);
        let trace = self.trace_at(span.start);
        let extension = reference
            .expected_type
            .map_or("txt", UrlType::inline_extension);
        let base = urls::without_query(self.url);
        let inline_url = urls::with_filename(
            &base,
            &format!("{}@L{}C{}.{extension}", urls::filename(&base), trace.line, trace.column),
        );

        reference.specifier = inline_url.to_string();
        reference.is_inline = true;
        reference.inline_site = Some(InlineSite {
            parent_url: self.url.clone(),
            line: trace.line,
            column: trace.column,
        });
        if reference.content.is_none()
            && let Some(text) = self.text()
            && let Some(body) = text.get(span.clone())
        {
            reference.content = Some(Content::from(body));
        }

        let reference = self.adopt(reference);
        let id = self.resolve(reference)?;
        let url = self
            .kitchen
            .graph()
            .reference(id)
            .and_then(|r| r.url.clone())
            .unwrap_or(inline_url);
        self.findings.inline.push(url.clone());
        self.findings.rewrites.push(Rewrite {
            span,
            replacement: Replacement::Inline(url),
        });
        Some(id)
    }

    /// Add a reference that does not appear in the content.
    pub fn inject(&mut self, mut reference: Reference) -> Option<ReferenceId> {
        reference.injected = true;
        reference.specifier_span = None;
        let reference = self.adopt(reference);
        self.resolve(reference)
    }

    /// Replace `span` with literal text when edits are applied.
    pub fn replace(&mut self, span: Range<usize>, text: impl Into<String>) {
        self.findings.rewrites.push(Rewrite {
            span,
            replacement: Replacement::Text(text.into()),
        });
    }

    /// Generated specifier of a reference found earlier in this hook.
    pub fn specifier_of(&self, id: ReferenceId) -> Option<String> {
        self.kitchen.graph().reference(id)?.generated_specifier.clone()
    }

    /// Store plugin data on the node once the transform is committed.
    pub fn set_data<T: Any + Send + Sync>(&mut self, value: T) {
        self.findings.data.insert(value);
    }

    pub(crate) fn finish(self) -> Findings {
        self.findings
    }

    fn adopt(&self, mut reference: Reference) -> Reference {
        reference.parent_url = Some(self.url.clone());
        if reference.trace.url.is_none() {
            reference.trace = match &reference.specifier_span {
                Some(span) => self.trace_at(span.start),
                None => Trace::url(self.url),
            };
        }
        reference
    }

    fn resolve(&mut self, reference: Reference) -> Option<ReferenceId> {
        match self.kitchen.resolve_reference(reference) {
            Ok(id) => {
                self.findings.references.push(id);
                Some(id)
            }
            Err(err) => {
                self.findings.errors.push(err);
                None
            }
        }
    }
}

// ============================================================================
// CookedScope
// ============================================================================

/// Handle given to `cooked` hooks once a node is fully cooked.
pub struct CookedScope<'g> {
    pub context: &'g KitchenContext,
    pub url_info: &'g UrlInfo,
    callbacks: Vec<PruneCallback>,
}

impl<'g> CookedScope<'g> {
    pub(crate) fn new(context: &'g KitchenContext, url_info: &'g UrlInfo) -> Self {
        Self {
            context,
            url_info,
            callbacks: Vec::new(),
        }
    }

    /// Run `callback` once if this node is later pruned.
    pub fn on_pruned(&mut self, callback: impl FnOnce(&PruneEvent) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub(crate) fn finish(self) -> Vec<PruneCallback> {
        self.callbacks
    }
}
