//! References in JavaScript: imports, workers, `new URL` and hot reload calls.

use std::sync::LazyLock;

use regex::Regex;

use super::{first_group, is_skippable};
use crate::graph::{Escape, Reference, ReferenceKind, UrlSubtype, UrlType};
use crate::hmr::HotMeta;
use crate::kitchen::TransformScope;
use crate::plugin::ContentResult;

static STATIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:import|export)\s*(?:[\w*{}\s,$]+?\s*from\s*)?(?:"([^"\n]+)"|'([^'\n]+)')"#).unwrap()
});

static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\(\s*(?:"([^"\n]+)"|'([^'\n]+)')\s*\)"#).unwrap()
});

static NEW_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bnew\s+URL\s*\(\s*(?:"([^"\n]+)"|'([^'\n]+)')\s*,\s*import\.meta\.url\s*\)"#).unwrap()
});

static WORKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\bnew\s+(Worker|SharedWorker)\s*\(\s*(?:"([^"\n]+)"|'([^'\n]+)')(\s*,\s*\{\s*type\s*:\s*["']module["'])?"#,
    )
    .unwrap()
});

static SOURCEMAP_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^//[#@]\s*sourceMappingURL=(\S+)\s*$").unwrap());

static HOT_ACCEPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\.meta\.hot\.accept\s*\(\s*(?:\)|"([^"\n]+)"|'([^'\n]+)')"#).unwrap()
});

static HOT_DECLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"import\.meta\.hot\.decline\s*\(").unwrap());

pub(super) fn scan(scope: &mut TransformScope<'_>) -> ContentResult {
    let Some(js) = scope.text() else {
        return Ok(None);
    };

    for caps in STATIC_IMPORT.captures_iter(js) {
        let Some((span, specifier)) = first_group(&caps, &[1, 2]) else { continue };
        if is_skippable(specifier) {
            continue;
        }
        scope.found(
            Reference::new(ReferenceKind::ScriptImport, specifier)
                .with_span(span)
                .with_escape(Escape::Json)
                .expecting(UrlType::JsModule),
        );
    }

    for caps in DYNAMIC_IMPORT.captures_iter(js) {
        let Some((span, specifier)) = first_group(&caps, &[1, 2]) else { continue };
        scope.found(
            Reference::new(ReferenceKind::ScriptDynamicImport, specifier)
                .with_span(span)
                .with_escape(Escape::Json)
                .expecting(UrlType::JsModule),
        );
    }

    for caps in WORKER.captures_iter(js) {
        let Some((span, specifier)) = first_group(&caps, &[2, 3]) else { continue };
        let subtype = if &caps[1] == "SharedWorker" {
            UrlSubtype::SharedWorker
        } else {
            UrlSubtype::Worker
        };
        let url_type = if caps.get(4).is_some() {
            UrlType::JsModule
        } else {
            UrlType::JsClassic
        };
        scope.found(
            Reference::new(ReferenceKind::ScriptWorker, specifier)
                .with_span(span)
                .with_escape(Escape::Json)
                .expecting(url_type)
                .expecting_subtype(subtype),
        );
    }

    for caps in NEW_URL.captures_iter(js) {
        let Some((span, specifier)) = first_group(&caps, &[1, 2]) else { continue };
        scope.found(
            Reference::new(ReferenceKind::ScriptNewUrl, specifier)
                .with_span(span)
                .with_escape(Escape::Json),
        );
    }

    for caps in SOURCEMAP_COMMENT.captures_iter(js) {
        let Some(m) = caps.get(1) else { continue };
        scope.found(
            Reference::new(ReferenceKind::SourcemapComment, m.as_str())
                .with_span(m.range())
                .expecting(UrlType::Sourcemap)
                .without_versioning_effect(),
        );
    }

    if let Some(meta) = hot_meta(scope, js) {
        scope.set_data(meta);
    }
    Ok(None)
}

/// `import.meta.hot` declarations, if the script makes any.
fn hot_meta(scope: &TransformScope<'_>, js: &str) -> Option<HotMeta> {
    let mut meta = HotMeta::default();
    let mut declared = false;
    for caps in HOT_ACCEPT.captures_iter(js) {
        declared = true;
        match first_group(&caps, &[1, 2]) {
            None => meta.accept_self = true,
            Some((_, specifier)) => {
                if let Ok(url) = scope.url().join(specifier) {
                    meta.accept_from.push(url);
                }
            }
        }
    }
    if HOT_DECLINE.is_match(js) {
        declared = true;
        meta.decline = true;
    }
    declared.then_some(meta)
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::super::tests::{cooked, kitchen};
    use super::*;
    use crate::graph::ReferenceKind;
    use crate::plugins::memory::MemoryFiles;

    fn files() -> MemoryFiles {
        MemoryFiles::new(&Url::parse("file:///app/").unwrap())
    }

    #[tokio::test]
    async fn test_import_forms() {
        let files = files();
        files.insert(
            "main.js",
            concat!(
                "import a from './a.js'\n",
                "import { b, c } from \"./b.js\";\n",
                "export * from './c.js'\n",
                "import './d.js'\n",
                "const e = import('./e.js')\n",
            ),
        );
        for name in ["a.js", "b.js", "c.js", "d.js", "e.js"] {
            files.insert(name, "");
        }
        let kitchen = kitchen(&files);

        let js = cooked(&kitchen, "main.js").await;
        assert!(js.contains("import a from '/a.js'"));
        assert!(js.contains("from \"/b.js\""));
        assert!(js.contains("import('/e.js')"));

        let graph = kitchen.graph();
        let kinds: Vec<ReferenceKind> = graph.references_of(&files.url("main.js")).map(|r| r.kind).collect();
        assert_eq!(kinds.len(), 5);
        assert!(kinds.contains(&ReferenceKind::ScriptDynamicImport));
    }

    #[tokio::test]
    async fn test_worker_and_new_url() {
        let files = files();
        files.insert(
            "main.js",
            "new Worker('./w.js', { type: 'module' });\nconst img = new URL('./logo.png', import.meta.url)",
        );
        files.insert("w.js", "");
        files.insert("logo.png", "png");
        let kitchen = kitchen(&files);

        cooked(&kitchen, "main.js").await;
        let graph = kitchen.graph();
        let worker = graph.get(&files.url("w.js")).unwrap();
        assert_eq!(worker.subtype, Some(UrlSubtype::Worker));
        assert_eq!(worker.url_type, Some(UrlType::JsModule));
        assert!(graph.contains(&files.url("logo.png")));
    }

    #[tokio::test]
    async fn test_hot_declarations() {
        let files = files();
        files.insert("a.js", "import.meta.hot.accept()\nimport.meta.hot.accept('./dep.js')");
        files.insert("b.js", "import.meta.hot.decline()");
        files.insert("c.js", "export const x = 1");
        let kitchen = kitchen(&files);

        for name in ["a.js", "b.js", "c.js"] {
            cooked(&kitchen, name).await;
        }
        let graph = kitchen.graph();
        let a = HotMeta::of(graph.get(&files.url("a.js")).unwrap());
        assert!(a.accept_self);
        assert_eq!(a.accept_from, [files.url("dep.js")]);
        assert!(HotMeta::of(graph.get(&files.url("b.js")).unwrap()).decline);
        assert_eq!(HotMeta::of(graph.get(&files.url("c.js")).unwrap()), HotMeta::default());
    }
}
