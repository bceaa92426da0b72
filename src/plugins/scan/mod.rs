//! Regex-based reference scanners for markup, scripts and stylesheets.
//!
//! They find specifiers well enough to drive the graph; they are not
//! parsers. Every specifier is reported with the byte span of its text
//! (inside the quotes), so the kitchen can splice the generated
//! specifier in its place.

mod markup;
mod script;
mod style;

use std::ops::Range;

use regex::Captures;

use crate::graph::UrlType;
use crate::plugin::Plugin;

pub fn markup() -> Plugin {
    Plugin::new("scan-markup").transform_url_content_for(UrlType::Html, markup::scan)
}

pub fn script() -> Plugin {
    Plugin::new("scan-script")
        .transform_url_content_for(UrlType::JsModule, script::scan)
        .transform_url_content_for(UrlType::JsClassic, script::scan)
}

pub fn style() -> Plugin {
    Plugin::new("scan-style").transform_url_content_for(UrlType::Css, style::scan)
}

pub fn plugins() -> Vec<Plugin> {
    vec![markup(), script(), style()]
}

/// Span and text of the first capture group among `groups` that matched.
fn first_group<'t>(caps: &Captures<'t>, groups: &[usize]) -> Option<(Range<usize>, &'t str)> {
    groups
        .iter()
        .find_map(|&i| caps.get(i))
        .map(|m| (m.range(), m.as_str()))
}

/// Specifiers that point nowhere worth following.
fn is_skippable(specifier: &str) -> bool {
    let specifier = specifier.trim();
    specifier.is_empty() || specifier.starts_with('#') || specifier.starts_with("javascript:")
}

#[cfg(test)]
pub(super) mod tests {
    use std::sync::Arc;

    use url::Url;

    use crate::kitchen::Kitchen;
    use crate::plugin::{KitchenContext, Phase};
    use crate::plugins::{builtin, memory::MemoryFiles};

    pub(crate) fn kitchen(files: &MemoryFiles) -> Arc<Kitchen> {
        let context = KitchenContext::new(Phase::Dev, Url::parse("file:///app/").unwrap());
        let mut plugins = builtin::plugins();
        plugins.extend(super::plugins());
        plugins.push(files.plugin());
        Kitchen::new(context, plugins)
    }

    /// Cook `path` and return its content as text.
    pub(crate) async fn cooked(kitchen: &Arc<Kitchen>, path: &str) -> String {
        let url = kitchen.resolve_request(path).unwrap();
        kitchen.cook(url.clone()).await.unwrap();
        let graph = kitchen.graph();
        let content = graph.get(&url).and_then(|info| info.content.as_ref()).unwrap();
        content.as_text().unwrap().to_string()
    }
}
