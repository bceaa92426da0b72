//! Kitchen behavior against in-memory files.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use url::Url;

use super::*;
use crate::error::TransformError;
use crate::plugin::{Phase, TransformOutput};
use crate::plugins::{builtin, memory::MemoryFiles, scan};
use crate::utils::urls;

fn files() -> MemoryFiles {
    MemoryFiles::new(&Url::parse("file:///app/").unwrap())
}

fn kitchen_with(files: &MemoryFiles, extra: Vec<Plugin>) -> Arc<Kitchen> {
    let context = KitchenContext::new(Phase::Dev, Url::parse("file:///app/").unwrap());
    let mut plugins = builtin::plugins();
    plugins.extend(extra);
    plugins.extend(scan::plugins());
    plugins.push(files.plugin());
    Kitchen::new(context, plugins)
}

fn kitchen(files: &MemoryFiles) -> Arc<Kitchen> {
    kitchen_with(files, Vec::new())
}

fn text(kitchen: &Kitchen, url: &Url) -> String {
    let graph = kitchen.graph();
    let content = graph.get(url).and_then(|info| info.content.as_ref()).unwrap();
    content.as_text().unwrap().to_string()
}

fn touch(kitchen: &Kitchen, url: &Url) {
    kitchen.graph().consider_modified(url, timestamp::now(), |_| false);
}

// ============================================================================
// Deduplication
// ============================================================================

mod dedup {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_cooks_share_one_fetch() {
        let files = files().with_delay(Duration::from_millis(30));
        let url = files.insert("main.js", "export const a = 1");
        let kitchen = kitchen(&files);
        kitchen.resolve_request("/main.js").unwrap();

        let (a, b) = tokio::join!(kitchen.cook(url.clone()), kitchen.cook(url.clone()));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(files.fetch_count("main.js"), 1);
        assert_eq!(kitchen.cook_count(), 1);
    }

    #[tokio::test]
    async fn test_valid_node_is_not_cooked_again() {
        let files = files();
        let url = files.insert("main.js", "export const a = 1");
        let kitchen = kitchen(&files);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        kitchen.cook(url.clone()).await.unwrap();
        assert_eq!(files.fetch_count("main.js"), 1);
    }

    #[tokio::test]
    async fn test_recook_of_identical_input_is_identical() {
        let files = files();
        let url = files.insert("main.js", "import './dep.js'");
        files.insert("dep.js", "");
        let kitchen = kitchen(&files);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        let (content, etag) = {
            let graph = kitchen.graph();
            let info = graph.get(&url).unwrap();
            (info.content.clone(), info.content_etag.clone())
        };

        touch(&kitchen, &url);
        kitchen.cook(url.clone()).await.unwrap();
        let graph = kitchen.graph();
        let info = graph.get(&url).unwrap();
        assert_eq!(files.fetch_count("main.js"), 2);
        assert_eq!(info.content, content);
        assert_eq!(info.content_etag, etag);
        assert!(info.is_valid());
    }

    #[tokio::test]
    async fn test_stale_pending_cook_is_restarted() {
        let files = files().with_delay(Duration::from_millis(40));
        let url = files.insert("main.js", "old");
        let kitchen = kitchen(&files);
        kitchen.resolve_request("/main.js").unwrap();

        let first = tokio::spawn(kitchen.cook(url.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        files.insert("main.js", "new");
        touch(&kitchen, &url);
        let second = tokio::spawn(kitchen.cook(url.clone()));

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(files.fetch_count("main.js"), 2);
        assert_eq!(text(&kitchen, &url), "new");
        assert!(kitchen.graph().get(&url).unwrap().is_valid());
    }
}

// ============================================================================
// Pipeline
// ============================================================================

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn test_unhandled_urls_are_left_alone() {
        let files = files();
        let url = files.insert("main.js", "import 'https://cdn.example.com/lib.js'");
        let kitchen = kitchen(&files);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        assert_eq!(text(&kitchen, &url), "import 'https://cdn.example.com/lib.js'");

        let cdn = Url::parse("https://cdn.example.com/lib.js").unwrap();
        kitchen.cook(cdn.clone()).await.unwrap();
        let graph = kitchen.graph();
        let node = graph.get(&cdn).unwrap();
        assert!(!node.should_handle);
        assert_eq!(node.state, CookState::Cooked);
        assert!(node.content.is_none());
    }

    #[tokio::test]
    async fn test_later_span_wins_overlapping_rewrite() {
        let files = files();
        let url = files.insert("main.txt", "import './a.js'");
        files.insert("a.js", "");
        let edits = Plugin::new("edits").transform_url_content(|scope| {
            scope.found(Reference::new(ReferenceKind::ScriptImport, "./a.js").with_span(8..14));
            // overlaps the specifier, dropped
            scope.replace(0..10, "ignored");
            scope.replace(0..6, "IMPORT");
            Ok(None)
        });
        let kitchen = kitchen_with(&files, vec![edits]);
        kitchen.resolve_request("/main.txt").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        assert_eq!(text(&kitchen, &url), "IMPORT '/a.js'");
    }

    #[tokio::test]
    async fn test_returned_content_replaces_and_chains() {
        let files = files();
        let url = files.insert("main.js", "a");
        let append = |suffix: &'static str| {
            Plugin::new(suffix).transform_url_content(move |scope| {
                let text = scope.text().unwrap_or_default();
                Ok(Some(TransformOutput::new(format!("{text}{suffix}"))))
            })
        };
        let kitchen = kitchen_with(&files, vec![append("b"), append("c")]);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        assert_eq!(text(&kitchen, &url), "abc");
        let graph = kitchen.graph();
        let node = graph.get(&url).unwrap();
        assert_eq!(node.original_content.as_ref().and_then(|c| c.as_text()), Some("a"));
    }

    #[tokio::test]
    async fn test_search_params_change_generated_url_only() {
        let files = files();
        let url = files.insert("main.js", "import './a.js'");
        let dep = files.insert("a.js", "");
        let versioned = Plugin::new("v").transform_search_params(|_, reference, _| {
            (reference.kind == ReferenceKind::ScriptImport).then(|| vec![("v".to_string(), "1".to_string())])
        });
        let kitchen = kitchen_with(&files, vec![versioned]);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        assert_eq!(text(&kitchen, &url), "import '/a.js?v=1'");
        assert!(kitchen.graph().contains(&dep));
    }

    #[tokio::test]
    async fn test_redirect_chains_references() {
        let files = files();
        let url = files.insert("main.js", "import './old.js'");
        let new = files.insert("new.js", "");
        let moved = Plugin::new("moved").redirect_reference(|_, _, url| {
            url.path()
                .ends_with("/old.js")
                .then(|| urls::with_filename(url, "new.js"))
        });
        let kitchen = kitchen_with(&files, vec![moved]);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        assert_eq!(text(&kitchen, &url), "import '/new.js'");

        let graph = kitchen.graph();
        let reference = graph.references_of(&url).next().unwrap();
        let original = graph.references().original_of(reference.id);
        assert_ne!(original, reference.id);
        let first = graph.reference(original).unwrap();
        assert!(first.url.as_ref().unwrap().path().ends_with("/old.js"));
        assert!(graph.contains(&new));
        assert!(!graph.contains(&files.url("old.js")));
    }

    #[tokio::test]
    async fn test_finalize_runs_for_type() {
        let files = files();
        let url = files.insert("main.css", "body {}");
        let js = files.insert("main.js", "x");
        let banner = Plugin::new("banner").finalize_url_content_for(UrlType::Css, |request| async move {
            let text = request.content.as_text().unwrap_or_default().to_string();
            Ok(Some(TransformOutput::new(format!("/* banner */\n{text}"))))
        });
        let kitchen = kitchen_with(&files, vec![banner]);
        kitchen.resolve_request("/main.css").unwrap();
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        kitchen.cook(js.clone()).await.unwrap();
        assert_eq!(text(&kitchen, &url), "/* banner */\nbody {}");
        assert_eq!(text(&kitchen, &js), "x");
    }

    #[tokio::test]
    async fn test_pruned_callback_fires_once_dependency_is_dropped() {
        let files = files();
        let url = files.insert("main.js", "import './dep.js'");
        let dep = files.insert("dep.js", "");
        let pruned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pruned);
        let watcher = Plugin::new("watcher").cooked(move |scope| {
            if scope.url_info.url.path().ends_with("/dep.js") {
                let counter = Arc::clone(&counter);
                scope.on_pruned(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        let kitchen = kitchen_with(&files, vec![watcher]);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.cook(url.clone()).await.unwrap();
        kitchen.cook(dep.clone()).await.unwrap();
        files.insert("main.js", "export {}");
        touch(&kitchen, &url);
        kitchen.cook(url.clone()).await.unwrap();

        assert_eq!(pruned.load(Ordering::SeqCst), 1);
        assert!(!kitchen.graph().contains(&dep));
    }

    #[tokio::test]
    async fn test_requested_module_stops_being_entry_once_imported() {
        let files = files();
        let main = files.insert("main.js", "import './view.js'");
        let view = files.insert("view.js", "export {}");
        let kitchen = kitchen(&files);

        // requested before anything imports it
        kitchen.resolve_request("/view.js").unwrap();
        kitchen.cook(view.clone()).await.unwrap();
        assert!(kitchen.graph().get(&view).unwrap().is_entry_point);

        kitchen.resolve_request("/main.js").unwrap();
        kitchen.cook(main.clone()).await.unwrap();
        assert!(!kitchen.graph().get(&view).unwrap().is_entry_point);

        files.insert("main.js", "export {}");
        touch(&kitchen, &main);
        kitchen.cook(main.clone()).await.unwrap();
        assert!(!kitchen.graph().contains(&view));
    }

    #[tokio::test]
    async fn test_response_headers_collected() {
        let files = files();
        let url = files.insert("main.js", "");
        let headers = Plugin::new("cors").inject_response_headers(|_, _| {
            Some(vec![("access-control-allow-origin".to_string(), "*".to_string())])
        });
        let kitchen = kitchen_with(&files, vec![headers]);
        kitchen.resolve_request("/main.js").unwrap();
        kitchen.cook(url.clone()).await.unwrap();

        let headers = kitchen.response_headers(&url);
        assert_eq!(headers, [("access-control-allow-origin".to_string(), "*".to_string())]);
    }
}

// ============================================================================
// Errors
// ============================================================================

mod errors {
    use super::*;

    #[tokio::test]
    async fn test_resolve_error_carries_trace() {
        let files = files();
        let url = files.insert("main.js", "\nimport './dep.js'");
        // resolves requests only, so the import finds no resolver
        let requests_only = Plugin::new("requests-only").resolve_reference(|ctx, reference| {
            if reference.kind != ReferenceKind::Request {
                return None;
            }
            ctx.root_directory_url.join(reference.specifier.trim_start_matches('/')).ok()
        });
        let context = KitchenContext::new(Phase::Dev, Url::parse("file:///app/").unwrap());
        let mut plugins = vec![requests_only];
        plugins.extend(scan::plugins());
        plugins.push(files.plugin());
        let kitchen = Kitchen::new(context, plugins);
        kitchen.resolve_request("/main.js").unwrap();

        let err = kitchen.cook(url.clone()).await.unwrap_err();
        assert!(matches!(err.kind, CookErrorKind::Resolve(ref s) if s == "./dep.js"));
        assert_eq!(err.plugin.as_deref(), Some("scan-script"));
        let trace = err.trace.as_ref().unwrap();
        assert_eq!((trace.line, trace.column), (2, 8));
        assert!(kitchen.graph().get(&url).unwrap().error.is_some());
    }

    #[tokio::test]
    async fn test_parse_error_keeps_best_effort_content() {
        let files = files();
        let url = files.insert("main.js", "let x = @@;");
        let strict = Plugin::new("strict-parser").transform_url_content(|scope| {
            match scope.text().and_then(|t| t.find("@@")) {
                Some(offset) => Err(TransformError::parse("unexpected token", offset)),
                None => Ok(None),
            }
        });
        let kitchen = kitchen_with(&files, vec![strict]);
        kitchen.resolve_request("/main.js").unwrap();

        let err = kitchen.cook(url.clone()).await.unwrap_err();
        assert!(err.is_parse_error());
        assert_eq!(err.plugin.as_deref(), Some("strict-parser"));
        assert_eq!(err.trace.as_ref().map(|t| (t.line, t.column)), Some((1, 8)));

        let graph = kitchen.graph();
        let node = graph.get(&url).unwrap();
        assert!(!node.is_valid());
        assert_eq!(node.content.as_ref().and_then(|c| c.as_text()), Some("let x = @@;"));
    }

    #[tokio::test]
    async fn test_fetch_error_names_plugin() {
        let files = files();
        let url = files.url("gone.js");
        let kitchen = kitchen(&files);
        kitchen.resolve_request("/gone.js").unwrap();

        let err = kitchen.cook(url).await.unwrap_err();
        assert!(matches!(err.kind, CookErrorKind::Fetch(FetchError::NotFound(_))));
        assert_eq!(err.plugin.as_deref(), Some("memory-fetch"));
    }

    #[tokio::test]
    async fn test_failed_inline_child_fails_parent() {
        let files = files();
        let url = files.insert("index.html", "<script>let x = @@;</script>");
        let strict = Plugin::new("strict-parser").transform_url_content_for(UrlType::JsClassic, |scope| {
            match scope.text().and_then(|t| t.find("@@")) {
                Some(offset) => Err(TransformError::parse("unexpected token", offset)),
                None => Ok(None),
            }
        });
        let kitchen = kitchen_with(&files, vec![strict]);
        kitchen.resolve_request("/index.html").unwrap();

        let err = kitchen.cook(url.clone()).await.unwrap_err();
        assert!(err.is_parse_error());
        assert!(err.url.as_ref().unwrap().path().contains("index.html@L1C8.js"));
    }

    #[tokio::test]
    async fn test_cancelled_kitchen_refuses_to_cook() {
        let files = files();
        let url = files.insert("main.js", "");
        let kitchen = kitchen(&files);
        kitchen.resolve_request("/main.js").unwrap();

        kitchen.context().signal.cancel();
        let err = kitchen.cook(url).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(files.fetch_count("main.js"), 0);
    }
}

// ============================================================================
// GraphLoader
// ============================================================================

mod loader {
    use super::*;

    fn site(files: &MemoryFiles) {
        files.insert(
            "index.html",
            r#"<link rel="stylesheet" href="./main.css"><script type="module" src="./main.js"></script>"#,
        );
        files.insert("main.css", "body { background: url(./bg.png) }");
        files.insert("bg.png", "png");
        files.insert("main.js", "import './a.js'\nconst lazy = () => import('./lazy.js')");
        files.insert("a.js", "export const a = 1");
        files.insert("lazy.js", "export default 1");
    }

    #[tokio::test]
    async fn test_drain_cooks_everything_reachable() {
        let files = files();
        site(&files);
        let kitchen = kitchen(&files);
        let index = kitchen.resolve_request("/index.html").unwrap();

        let mut loader = GraphLoader::new(&kitchen);
        loader.load(index);
        let cooked = loader.drain().await.unwrap();
        assert_eq!(cooked, 6);

        let graph = kitchen.graph();
        assert!(graph.iter().filter(|n| n.should_handle).all(|n| n.is_valid()));
    }

    #[tokio::test]
    async fn test_dynamic_imports_can_be_left_lazy() {
        let files = files();
        site(&files);
        let kitchen = kitchen(&files);
        let index = kitchen.resolve_request("/index.html").unwrap();

        let mut loader = GraphLoader::new(&kitchen).ignore_dynamic_import(true);
        loader.load(index);
        assert_eq!(loader.drain().await.unwrap(), 5);
        assert_eq!(files.fetch_count("lazy.js"), 0);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_drain() {
        let files = files();
        site(&files);
        files.remove("a.js");
        let kitchen = kitchen(&files);
        let index = kitchen.resolve_request("/index.html").unwrap();

        let mut loader = GraphLoader::new(&kitchen);
        loader.load(index);
        let err = loader.drain().await.unwrap_err();
        assert!(matches!(err.kind, CookErrorKind::Fetch(FetchError::NotFound(_))));
    }
}
