//! Plugins every kitchen registers before user plugins.

use url::Url;

use crate::graph::ReferenceKind;
use crate::plugin::{AppliesDuring, FetchRequest, Fetched, Plugin};
use crate::utils::{mime, urls};

/// Search param carrying the last change timestamp of a node in dev.
pub const HOT_PARAM: &str = "hot";

/// Resolve specifiers against the parent URL.
///
/// `/x` resolves against the root directory, anything with a scheme is
/// taken as is, and everything else joins the parent (or the root when
/// the reference has no parent).
pub fn url_resolution() -> Plugin {
    Plugin::new("url-resolution").resolve_reference(|context, reference| {
        let specifier = reference.specifier.as_str();
        if urls::has_scheme(specifier) {
            return Url::parse(specifier).ok();
        }
        if let Some(path) = specifier.strip_prefix('/')
            && !path.starts_with('/')
        {
            return context.root_directory_url.join(path).ok();
        }
        let base = match reference.kind {
            ReferenceKind::EntryPoint | ReferenceKind::Request => &context.root_directory_url,
            _ => reference.parent_url.as_ref().unwrap_or(&context.root_directory_url),
        };
        base.join(specifier).ok()
    })
}

/// Serve inline resources from the content their parent gave them.
pub fn inline_content() -> Plugin {
    Plugin::new("inline-content").fetch_url_content(|request: FetchRequest| async move {
        if !request.is_inline {
            return Ok(None);
        }
        let Some(content) = request.inline_content else {
            return Ok(None);
        };
        let content_type = request
            .content_type
            .or_else(|| request.expected_type.map(|t| mime::for_type(t).to_string()));
        let mut fetched = Fetched::new(content);
        fetched.content_type = content_type;
        Ok(Some(fetched))
    })
}

/// Tag generated URLs of modified nodes with `?hot=<timestamp>`.
///
/// Clients that load a module again after an update then bypass their
/// cache. Incoming requests carry the param back; it is stripped before
/// the URL reaches the graph.
pub fn hot_search_param() -> Plugin {
    Plugin::new("hot-search-param")
        .applies_during(AppliesDuring::Dev)
        .redirect_reference(|_, _, url| {
            url.query_pairs()
                .any(|(key, _)| key == HOT_PARAM)
                .then(|| urls::without_search_param(url, HOT_PARAM))
        })
        .transform_search_params(|_, reference, node| {
            if reference.is_inline || !node.should_handle {
                return None;
            }
            let modified = node.modified_timestamp?;
            Some(vec![(HOT_PARAM.to_string(), modified.to_string())])
        })
}

/// The built-in plugins, in registration order.
pub fn plugins() -> Vec<Plugin> {
    vec![url_resolution(), inline_content(), hot_search_param()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Reference;
    use crate::plugin::{KitchenContext, Phase, PluginController};

    fn resolve(specifier: &str, parent: Option<&str>) -> Option<Url> {
        let context = KitchenContext::new(Phase::Dev, Url::parse("file:///app/").unwrap());
        let controller = PluginController::new(vec![url_resolution()], &context);
        let mut reference = Reference::new(ReferenceKind::ScriptImport, specifier);
        reference.parent_url = parent.map(|p| Url::parse(p).unwrap());
        controller
            .resolve
            .until(|hook| hook(&context, &reference))
            .map(|(_, url)| url)
    }

    #[test]
    fn test_relative_joins_parent() {
        let url = resolve("./util.js", Some("file:///app/lib/main.js")).unwrap();
        assert_eq!(url.as_str(), "file:///app/lib/util.js");
    }

    #[test]
    fn test_root_relative_joins_root() {
        let url = resolve("/style.css", Some("file:///app/lib/main.js")).unwrap();
        assert_eq!(url.as_str(), "file:///app/style.css");
    }

    #[test]
    fn test_absolute_kept() {
        let url = resolve("https://cdn.example.com/x.js", None).unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/x.js");
        let data = resolve("data:text/plain,hi", None).unwrap();
        assert_eq!(data.scheme(), "data");
    }

    #[test]
    fn test_hot_param_only_in_dev() {
        let build = KitchenContext::new(Phase::Craft, Url::parse("file:///app/").unwrap());
        let controller = PluginController::new(vec![hot_search_param()], &build);
        assert_eq!(controller.plugin_names().count(), 0);
    }

    #[test]
    fn test_hot_param_stripped_on_redirect() {
        let context = KitchenContext::new(Phase::Dev, Url::parse("file:///app/").unwrap());
        let controller = PluginController::new(vec![hot_search_param()], &context);
        let reference = Reference::new(ReferenceKind::Request, "/main.js?hot=12&x=1");
        let url = Url::parse("file:///app/main.js?hot=12&x=1").unwrap();

        let out = controller.redirect.fold(url, |hook, u| hook(&context, &reference, u));
        assert_eq!(out.as_str(), "file:///app/main.js?x=1");
    }
}
