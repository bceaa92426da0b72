//! References in HTML: url attributes and inline script/style bodies.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::{first_group, is_skippable};
use crate::graph::{Escape, Reference, ReferenceKind, UrlType};
use crate::kitchen::TransformScope;
use crate::plugin::ContentResult;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b([^>]*)>(.*?)</script\s*>").unwrap());

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b([^>]*)>(.*?)</style\s*>").unwrap());

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(script|link|img|source|iframe|video|audio|track|embed)\b([^>]*)>").unwrap()
});

static URL_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(src|href)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b([a-z][a-z0-9-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

/// Value of attribute `name`, lowercased.
fn attr(attrs: &str, name: &str) -> Option<String> {
    ATTR.captures_iter(attrs)
        .find(|caps| caps[1].eq_ignore_ascii_case(name))
        .and_then(|caps| first_group(&caps, &[2, 3, 4]).map(|(_, v)| v.trim().to_ascii_lowercase()))
}

fn script_type(attrs: &str) -> Option<UrlType> {
    match attr(attrs, "type").as_deref() {
        None | Some("" | "text/javascript" | "application/javascript") => Some(UrlType::JsClassic),
        Some("module") => Some(UrlType::JsModule),
        Some("importmap") => Some(UrlType::Importmap),
        // data blocks (`application/json`, templates)
        Some(_) => None,
    }
}

pub(super) fn scan(scope: &mut TransformScope<'_>) -> ContentResult {
    let Some(html) = scope.text() else {
        return Ok(None);
    };
    let mut bodies: Vec<Range<usize>> = Vec::new();

    for caps in SCRIPT_BLOCK.captures_iter(html) {
        let attrs = &caps[1];
        let Some(body) = caps.get(2) else { continue };
        bodies.push(body.range());
        if attr(attrs, "src").is_some() || body.as_str().trim().is_empty() {
            continue;
        }
        let Some(expected) = script_type(attrs) else { continue };
        scope.found_inline(
            Reference::new(ReferenceKind::MarkupInline, "")
                .with_subkind("script")
                .with_span(body.range())
                .expecting(expected),
        );
    }

    for caps in STYLE_BLOCK.captures_iter(html) {
        let Some(body) = caps.get(2) else { continue };
        bodies.push(body.range());
        if body.as_str().trim().is_empty() {
            continue;
        }
        scope.found_inline(
            Reference::new(ReferenceKind::MarkupInline, "")
                .with_subkind("style")
                .with_span(body.range())
                .expecting(UrlType::Css),
        );
    }

    for caps in TAG.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        if bodies.iter().any(|body| body.contains(&whole.start())) {
            continue;
        }
        let tag = caps[1].to_ascii_lowercase();
        let Some(attrs) = caps.get(2) else { continue };

        for attr_caps in URL_ATTR.captures_iter(attrs.as_str()) {
            let Some((span, value)) = first_group(&attr_caps, &[2, 3]) else {
                continue;
            };
            if is_skippable(value) {
                continue;
            }
            let span = attrs.start() + span.start..attrs.start() + span.end;
            let name = attr_caps[1].to_ascii_lowercase();
            if let Some(reference) = classify(&tag, &name, attrs.as_str(), value) {
                scope.found(reference.with_span(span).with_escape(Escape::HtmlAttribute));
            }
        }
    }
    Ok(None)
}

/// Turn one url attribute into a reference, or skip it.
fn classify(tag: &str, name: &str, attrs: &str, value: &str) -> Option<Reference> {
    let subkind = format!("{tag}.{name}");
    let attribute = || Reference::new(ReferenceKind::MarkupAttribute, value).with_subkind(subkind.clone());

    match tag {
        "script" => Some(attribute().expecting(script_type(attrs)?)),
        "link" => {
            let rel = attr(attrs, "rel").unwrap_or_default();
            let rels: Vec<&str> = rel.split_ascii_whitespace().collect();
            if rels.contains(&"stylesheet") {
                Some(attribute().expecting(UrlType::Css))
            } else if rels.contains(&"modulepreload") {
                Some(hint(value, &subkind).expecting(UrlType::JsModule))
            } else if rels
                .iter()
                .any(|r| matches!(*r, "preload" | "prefetch" | "preconnect" | "dns-prefetch" | "prerender"))
            {
                Some(hint(value, &subkind))
            } else if rels.contains(&"manifest") {
                Some(attribute().expecting(UrlType::Json))
            } else {
                Some(attribute())
            }
        }
        _ => Some(attribute()),
    }
}

fn hint(value: &str, subkind: &str) -> Reference {
    Reference::new(ReferenceKind::ResourceHint, value)
        .with_subkind(subkind)
        .resource_hint()
}
