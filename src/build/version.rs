//! Versioning pass over the refined graph.
//!
//! Every reachable resource except entry points gets a version: a hash
//! of its content with dependency placeholders replaced by the versioned
//! specifiers of those dependencies. Strongly connected components are
//! hashed together, leaf components first, so a version is only computed
//! once everything it points at has one.
//!
//! References delivered through an import map or the global lookup keep
//! the unversioned path in their parent, which then does not change when
//! only the dependency does.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use url::Url;

use super::refine::VERSION_PLACEHOLDER;
use super::{BuildOptions, VersioningMethod, VersioningPolicy, VersioningVia};
use crate::content::{Content, ContentHash};
use crate::debug;
use crate::graph::{Escape, ReferenceId, ReferenceKind, UrlGraph, UrlInfo, UrlType};
use crate::utils::urls;

static HEAD_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<head\b[^>]*>").unwrap());

const CYCLE_MARKER: &str = "__SIMMER_CYCLE__";

/// Result of versioning one refined graph.
#[derive(Debug, Default)]
pub(super) struct Versioned {
    pub manifest: BTreeMap<String, String>,
    pub files: BTreeMap<String, Content>,
    /// Build URL to the path of its output file
    pub file_paths: FxHashMap<Url, String>,
    /// Build URL to the specifier that points at it
    pub specifiers: FxHashMap<Url, String>,
}

/// One version placeholder inside a node's content.
#[derive(Debug, Clone)]
struct Slot {
    /// The placeholder itself
    span: Range<usize>,
    /// The placeholder with its quotes, when quoted
    quoted: Option<Range<usize>>,
    target: usize,
    via: VersioningVia,
    has_effect: bool,
    escape: Escape,
    kind: ReferenceKind,
}

struct Node<'g> {
    info: &'g UrlInfo,
    path: String,
    versionable: bool,
    slots: Vec<Slot>,
}

struct Pass<'g> {
    nodes: Vec<Node<'g>>,
    edges: Vec<Vec<usize>>,
    versions: Vec<Option<String>>,
    base: String,
    method: VersioningMethod,
}

pub(super) fn run(graph: &UrlGraph, options: &BuildOptions, policy: &dyn VersioningPolicy) -> Versioned {
    let mut pass = Pass::collect(graph, options, policy);
    if options.versioning.enable {
        for component in strongly_connected(&pass.edges) {
            pass.version_component(&component, options.versioning.length);
        }
    }
    pass.finish()
}

impl<'g> Pass<'g> {
    fn collect(graph: &'g UrlGraph, options: &BuildOptions, policy: &dyn VersioningPolicy) -> Self {
        let build_dir = &options.build_directory_url;
        let infos: Vec<&UrlInfo> = graph
            .reachable_from_entries()
            .iter()
            .filter_map(|url| graph.get(url))
            .filter(|info| info.should_handle && info.content.is_some())
            .collect();
        let index: FxHashMap<&Url, usize> = infos.iter().enumerate().map(|(i, info)| (&info.url, i)).collect();

        let mut nodes: Vec<Node<'g>> = infos
            .iter()
            .map(|&info| Node {
                info,
                path: urls::relative_to(&urls::without_query(&info.url), build_dir)
                    .unwrap_or_else(|| info.url.path().trim_start_matches('/').to_string()),
                versionable: options.versioning.enable && !info.is_entry_point,
                slots: Vec::new(),
            })
            .collect();

        for node in &mut nodes {
            let Some(text) = node.info.content.as_ref().and_then(Content::as_text) else {
                continue;
            };
            for caps in VERSION_PLACEHOLDER.captures_iter(text) {
                let (Some(whole), Some(id)) = (caps.get(0), caps[2].parse().ok().and_then(ReferenceId::from_index))
                else {
                    continue;
                };
                let reference = graph
                    .reference(id)
                    .unwrap_or_else(|| panic!("versioning: placeholder {id} in {} has no reference", node.info.url));
                let target = reference
                    .url
                    .as_ref()
                    .and_then(|url| index.get(url).copied())
                    .unwrap_or_else(|| panic!("versioning: {} points outside the build", reference.specifier));
                let (open, close) = (&caps[1], &caps[3]);
                let span = whole.start() + open.len()..whole.end() - close.len();
                let quoted = (!open.is_empty() && open == close).then(|| whole.range());
                let via = if options.versioning.enable {
                    policy.via(reference)
                } else {
                    VersioningVia::Specifier
                };
                node.slots.push(Slot {
                    span,
                    quoted,
                    target,
                    via,
                    has_effect: reference.has_versioning_effect,
                    escape: reference.escape,
                    kind: reference.kind,
                });
            }
        }

        let edges: Vec<Vec<usize>> = nodes
            .iter()
            .map(|node| {
                let mut targets: Vec<usize> = node.slots.iter().map(|slot| slot.target).collect();
                targets.sort_unstable();
                targets.dedup();
                targets
            })
            .collect();

        // Indirections only work for resources some HTML page loads, and
        // never inside a worker: it sees neither the import map nor the
        // global lookup of the page.
        let page_edges: Vec<Vec<usize>> = nodes
            .iter()
            .map(|node| {
                node.slots
                    .iter()
                    .filter(|slot| slot.kind != ReferenceKind::ScriptWorker)
                    .map(|slot| slot.target)
                    .collect()
            })
            .collect();
        let mut under_html = vec![false; nodes.len()];
        let mut in_worker = vec![false; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            if node.info.is_entry_point && node.info.url_type == Some(UrlType::Html) {
                for reached in reach(&page_edges, i) {
                    under_html[reached] = true;
                }
            }
            for slot in node.slots.iter().filter(|slot| slot.kind == ReferenceKind::ScriptWorker) {
                for reached in reach(&edges, slot.target) {
                    in_worker[reached] = true;
                }
            }
        }
        for (i, node) in nodes.iter_mut().enumerate() {
            let indirect = under_html[i] && !in_worker[i];
            for slot in &mut node.slots {
                let fallback = match slot.via {
                    VersioningVia::ImportMap => !indirect,
                    VersioningVia::GlobalLookup => !indirect || slot.quoted.is_none(),
                    VersioningVia::Specifier => false,
                };
                if fallback {
                    slot.via = VersioningVia::Specifier;
                }
            }
        }

        let mut base = options.base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            versions: vec![None; nodes.len()],
            nodes,
            edges,
            base,
            method: options.versioning.method,
        }
    }

    fn unversioned_specifier(&self, i: usize) -> String {
        format!("{}{}", self.base, self.nodes[i].path)
    }

    fn final_path(&self, i: usize) -> String {
        let path = &self.nodes[i].path;
        match &self.versions[i] {
            Some(version) => versioned_path(path, version, self.method),
            None => path.clone(),
        }
    }

    fn final_specifier(&self, i: usize) -> String {
        format!("{}{}", self.base, self.final_path(i))
    }

    /// Hash every member of `component` together and version them alike.
    fn version_component(&mut self, component: &[usize], length: usize) {
        let mut members = component.to_vec();
        members.sort_by(|&a, &b| self.nodes[a].path.cmp(&self.nodes[b].path));

        let mut hasher = blake3::Hasher::new();
        for &member in &members {
            let content = self.render(member, |pass, slot| {
                if !slot.has_effect || slot.via != VersioningVia::Specifier {
                    pass.unversioned_specifier(slot.target)
                } else if component.contains(&slot.target) {
                    CYCLE_MARKER.to_string()
                } else {
                    if pass.nodes[slot.target].versionable && pass.versions[slot.target].is_none() {
                        panic!("versioning: {} has no version yet", pass.nodes[slot.target].info.url);
                    }
                    pass.final_specifier(slot.target)
                }
            });
            hasher.update(content.as_bytes());
        }
        let version = ContentHash::new(*hasher.finalize().as_bytes()).fingerprint(length);

        for &member in &members {
            if self.nodes[member].versionable {
                debug!("build"; "{} -> {version}", self.nodes[member].path);
                self.versions[member] = Some(version.clone());
            }
        }
    }

    /// Content of node `i` with each placeholder replaced by `text_of`.
    fn render(&self, i: usize, text_of: impl Fn(&Self, &Slot) -> String) -> Content {
        let node = &self.nodes[i];
        let Some(content) = node.info.content.as_ref() else {
            return Content::Text(String::new());
        };
        let Some(text) = content.as_text() else {
            return content.clone();
        };
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for slot in &node.slots {
            out.push_str(&text[cursor..slot.span.start]);
            out.push_str(&text_of(self, slot));
            cursor = slot.span.end;
        }
        out.push_str(&text[cursor..]);
        Content::Text(out)
    }

    /// Final text of node `i`; global lookups replace their quotes too.
    fn render_final(&self, i: usize) -> Content {
        let node = &self.nodes[i];
        let Some(text) = node.info.content.as_ref().and_then(Content::as_text) else {
            return self.render(i, |_, _| String::new());
        };
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for slot in &node.slots {
            let (range, replacement) = match (slot.via, &slot.quoted) {
                (VersioningVia::GlobalLookup, Some(quoted)) => {
                    let path = serde_json::Value::String(self.unversioned_specifier(slot.target));
                    (quoted.clone(), format!("globalThis.__v__({path})"))
                }
                (VersioningVia::ImportMap, _) => {
                    (slot.span.clone(), slot.escape.apply(&self.unversioned_specifier(slot.target)))
                }
                _ => (slot.span.clone(), slot.escape.apply(&self.final_specifier(slot.target))),
            };
            out.push_str(&text[cursor..range.start]);
            out.push_str(&replacement);
            cursor = range.end;
        }
        out.push_str(&text[cursor..]);

        if node.info.is_entry_point && node.info.url_type == Some(UrlType::Html) {
            let (import_map, lookup) = self.indirections_from(i);
            out = inject_mappings(&out, &import_map, &lookup);
        }
        Content::Text(out)
    }

    /// Mappings needed by everything page `i` loads.
    fn indirections_from(&self, i: usize) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let mut import_map = BTreeMap::new();
        let mut lookup = BTreeMap::new();
        for reached in reach(&self.edges, i) {
            for slot in &self.nodes[reached].slots {
                let table = match slot.via {
                    VersioningVia::ImportMap => &mut import_map,
                    VersioningVia::GlobalLookup => &mut lookup,
                    VersioningVia::Specifier => continue,
                };
                let from = self.unversioned_specifier(slot.target);
                let to = self.final_specifier(slot.target);
                if from != to {
                    table.insert(from, to);
                }
            }
        }
        (import_map, lookup)
    }

    fn finish(self) -> Versioned {
        let mut out = Versioned::default();
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            let final_path = self.final_path(i);
            let file_path = match self.method {
                VersioningMethod::Filename => final_path.clone(),
                VersioningMethod::SearchParam => node.path.clone(),
            };
            if self.versions[i].is_some() {
                out.manifest.insert(node.path.clone(), final_path);
            }
            out.files.insert(file_path.clone(), self.render_final(i));
            out.file_paths.insert(node.info.url.clone(), file_path);
            out.specifiers.insert(node.info.url.clone(), self.final_specifier(i));
        }
        out
    }
}

/// `assets/js/a.js` with version `v` attached per `method`.
fn versioned_path(path: &str, version: &str, method: VersioningMethod) -> String {
    match method {
        VersioningMethod::Filename => {
            let (dir, name) = match path.rfind('/') {
                Some(pos) => path.split_at(pos + 1),
                None => ("", path),
            };
            let (stem, extension) = urls::split_extension(name);
            format!("{dir}{stem}-{version}{extension}")
        }
        VersioningMethod::SearchParam => format!("{path}?v={version}"),
    }
}

/// Put an import map and the lookup function at the top of `<head>`.
fn inject_mappings(html: &str, import_map: &BTreeMap<String, String>, lookup: &BTreeMap<String, String>) -> String {
    let mut scripts = String::new();
    if !import_map.is_empty() {
        let json = serde_json::json!({ "imports": import_map });
        scripts.push_str(&format!("<script type=\"importmap\">{json}</script>"));
    }
    if !lookup.is_empty() {
        let json = serde_json::json!(lookup);
        scripts.push_str(&format!("<script>globalThis.__v__ = ((m) => (p) => m[p] || p)({json});</script>"));
    }
    if scripts.is_empty() {
        return html.to_string();
    }
    let at = HEAD_OPEN.find(html).map_or(0, |m| m.end());
    let mut out = String::with_capacity(html.len() + scripts.len());
    out.push_str(&html[..at]);
    out.push_str(&scripts);
    out.push_str(&html[at..]);
    out
}

/// Every node reachable from `start`, `start` included.
fn reach(edges: &[Vec<usize>], start: usize) -> Vec<usize> {
    let mut seen = vec![false; edges.len()];
    let mut stack = vec![start];
    let mut out = Vec::new();
    while let Some(i) = stack.pop() {
        if std::mem::replace(&mut seen[i], true) {
            continue;
        }
        out.push(i);
        stack.extend(edges[i].iter().copied().filter(|&t| !seen[t]));
    }
    out
}

// ============================================================================
// Strongly connected components
// ============================================================================

/// Tarjan's algorithm. Components come out leaf-first: a component is
/// emitted only after every component it points at.
fn strongly_connected(edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State<'a> {
        edges: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    fn visit(state: &mut State<'_>, v: usize) {
        state.index[v] = Some(state.next);
        state.low[v] = state.next;
        state.next += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        for &w in &state.edges[v] {
            match state.index[w] {
                None => {
                    visit(state, w);
                    state.low[v] = state.low[v].min(state.low[w]);
                }
                Some(index) if state.on_stack[w] => state.low[v] = state.low[v].min(index),
                Some(_) => {}
            }
        }

        if Some(state.low[v]) == state.index[v] {
            let mut component = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            state.components.push(component);
        }
    }

    let n = edges.len();
    let mut state = State {
        edges,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if state.index[v].is_none() {
            visit(&mut state, v);
        }
    }
    state.components
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_path() {
        assert_eq!(
            versioned_path("assets/js/a.js", "1a2b", VersioningMethod::Filename),
            "assets/js/a-1a2b.js"
        );
        assert_eq!(versioned_path("LICENSE", "1a2b", VersioningMethod::Filename), "LICENSE-1a2b");
        assert_eq!(
            versioned_path("assets/js/a.js", "1a2b", VersioningMethod::SearchParam),
            "assets/js/a.js?v=1a2b"
        );
    }

    #[test]
    fn test_components_are_leaf_first() {
        // 0 -> 1 -> 2 -> 1, 0 -> 3
        let edges = vec![vec![1, 3], vec![2], vec![1], vec![]];
        let components = strongly_connected(&edges);
        let position = |v: usize| components.iter().position(|c| c.contains(&v)).unwrap();

        assert_eq!(components.len(), 3);
        assert_eq!(position(1), position(2));
        assert!(position(1) < position(0));
        assert!(position(3) < position(0));
    }

    #[test]
    fn test_inject_after_head() {
        let mut map = BTreeMap::new();
        map.insert("/a.js".to_string(), "/a-1.js".to_string());
        let html = inject_mappings("<html><head><title>x</title></head></html>", &map, &BTreeMap::new());
        assert_eq!(
            html,
            r#"<html><head><script type="importmap">{"imports":{"/a.js":"/a-1.js"}}</script><title>x</title></head></html>"#
        );
    }

    #[test]
    fn test_inject_nothing() {
        let html = "<p>hi</p>";
        assert_eq!(inject_mappings(html, &BTreeMap::new(), &BTreeMap::new()), html);
    }
}
