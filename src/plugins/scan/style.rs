//! References in CSS: `@import` and `url()`.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::{first_group, is_skippable};
use crate::graph::{Reference, ReferenceKind, UrlType};
use crate::kitchen::TransformScope;
use crate::plugin::ContentResult;

static IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?(?:"([^"]+)"|'([^']+)'|([^"'\s;)]+))"#).unwrap()
});

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^"')\s]+))\s*\)"#).unwrap()
});

static SOURCEMAP_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*[#@]\s*sourceMappingURL=([^\s*]+)\s*\*/").unwrap());

pub(super) fn scan(scope: &mut TransformScope<'_>) -> ContentResult {
    let Some(css) = scope.text() else {
        return Ok(None);
    };
    let mut imports: Vec<Range<usize>> = Vec::new();

    for caps in IMPORT.captures_iter(css) {
        let Some((span, specifier)) = first_group(&caps, &[1, 2, 3]) else { continue };
        imports.push(span.clone());
        scope.found(
            Reference::new(ReferenceKind::StyleImport, specifier)
                .with_span(span)
                .expecting(UrlType::Css),
        );
    }

    for caps in URL.captures_iter(css) {
        let Some((span, specifier)) = first_group(&caps, &[1, 2, 3]) else { continue };
        if is_skippable(specifier) || imports.contains(&span) {
            continue;
        }
        scope.found(Reference::new(ReferenceKind::StyleUrl, specifier).with_span(span));
    }

    for caps in SOURCEMAP_COMMENT.captures_iter(css) {
        let Some(m) = caps.get(1) else { continue };
        scope.found(
            Reference::new(ReferenceKind::SourcemapComment, m.as_str())
                .with_span(m.range())
                .expecting(UrlType::Sourcemap)
                .without_versioning_effect(),
        );
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::super::tests::{cooked, kitchen};
    use crate::plugins::memory::MemoryFiles;

    #[tokio::test]
    async fn test_import_and_url() {
        let files = MemoryFiles::new(&Url::parse("file:///app/").unwrap());
        files.insert(
            "css/main.css",
            "@import url(\"./reset.css\");\n@import './theme.css';\nbody { background: url(../img/bg.png) }\n.x { filter: url(#blur) }",
        );
        files.insert("css/reset.css", "");
        files.insert("css/theme.css", "");
        files.insert("img/bg.png", "png");
        let kitchen = kitchen(&files);

        let css = cooked(&kitchen, "css/main.css").await;
        assert_eq!(
            css,
            "@import url(\"/css/reset.css\");\n@import '/css/theme.css';\nbody { background: url(/img/bg.png) }\n.x { filter: url(#blur) }"
        );
        let graph = kitchen.graph();
        assert_eq!(graph.get(&files.url("css/main.css")).unwrap().dependencies.len(), 3);
    }
}
