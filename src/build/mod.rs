//! Production builds.
//!
//! A build runs three passes, each with its own kitchen and graph so dev
//! state and build state never mix:
//!
//! 1. **craft**: cook every entry point with the full plugin set. Handled
//!    references are written as opaque tokens naming the reference.
//! 2. **shape**: hand reachable resources to bundler plugins and record
//!    which raw URL each bundle now stands for.
//! 3. **refine**: re-root everything into the build directory, then
//!    version the output leaf-first and assemble files and manifest.

mod allocator;
mod craft;
mod output;
mod policy;
mod refine;
mod shape;
mod version;


pub use output::BuildOutput;
pub use policy::{DefaultVersioningPolicy, VersioningPolicy, VersioningVia};
pub use shape::{BundleOutput, BundleRequest, BundledFile};

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::content::Content;
use crate::error::BuildError;
use crate::graph::{ReferenceId, UrlGraph};
use crate::log;
use crate::plugin::{CancelSignal, Plugin};
use crate::utils::plural::plural_count;
use crate::utils::urls;

/// How a version is attached to a build path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningMethod {
    /// `main-1a2b3c4d.js`
    #[default]
    Filename,
    /// `main.js?v=1a2b3c4d`
    SearchParam,
}

#[derive(Debug, Clone)]
pub struct VersioningOptions {
    pub enable: bool,
    pub method: VersioningMethod,
    /// Hex characters kept from the content hash
    pub length: usize,
    pub import_map: bool,
    pub global_lookup: bool,
}

impl Default for VersioningOptions {
    fn default() -> Self {
        Self {
            enable: true,
            method: VersioningMethod::Filename,
            length: 8,
            import_map: true,
            global_lookup: true,
        }
    }
}

/// Everything a build needs besides its plugins.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub root_directory_url: Url,
    pub build_directory_url: Url,
    /// Entry specifiers, relative to the root directory
    pub entries: Vec<String>,
    /// Prefix of every generated build specifier
    pub base: String,
    pub assets_dir: String,
    pub versioning: VersioningOptions,
    pub ignore: Vec<Regex>,
    pub signal: CancelSignal,
}

impl BuildOptions {
    pub fn new(root_directory_url: Url, build_directory_url: Url) -> Self {
        Self {
            root_directory_url: urls::as_directory(&root_directory_url),
            build_directory_url: urls::as_directory(&build_directory_url),
            entries: vec!["index.html".to_string()],
            base: "/".to_string(),
            assets_dir: "assets".to_string(),
            versioning: VersioningOptions::default(),
            ignore: Vec::new(),
            signal: CancelSignal::new(),
        }
    }

    pub fn with_entries<S: Into<String>>(mut self, entries: impl IntoIterator<Item = S>) -> Self {
        self.entries = entries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_versioning(mut self, versioning: VersioningOptions) -> Self {
        self.versioning = versioning;
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.signal.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Reference tokens
// ============================================================================

/// Crafted content names its handled references with these tokens.
static REFERENCE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__SIMMER_REF_(\d+)__").unwrap());

fn reference_token(id: ReferenceId) -> String {
    format!("__SIMMER_REF_{}__", id.index())
}

/// Replace every reference token of `text` through `specifier_of`.
///
/// Tokens `specifier_of` knows nothing about are left in place.
fn replace_reference_tokens(text: &str, mut specifier_of: impl FnMut(ReferenceId) -> Option<String>) -> String {
    REFERENCE_TOKEN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(ReferenceId::from_index)
                .and_then(&mut specifier_of)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

// ============================================================================
// BuildOrchestrator
// ============================================================================

/// Runs the craft, shape and refine passes of one build.
pub struct BuildOrchestrator {
    options: BuildOptions,
    plugins: Vec<Plugin>,
    refine_plugins: Vec<Plugin>,
    policy: Arc<dyn VersioningPolicy>,
}

impl BuildOrchestrator {
    /// `plugins` is the complete craft plugin set, built-ins included.
    pub fn new(options: BuildOptions, plugins: Vec<Plugin>) -> Self {
        let policy = Arc::new(DefaultVersioningPolicy::new(&options.versioning));
        Self {
            options,
            plugins,
            refine_plugins: Vec::new(),
            policy,
        }
    }

    /// Extra plugins for the refine kitchen, typically finalizers such as
    /// minifiers that must see bundled output.
    pub fn with_refine_plugins(mut self, plugins: Vec<Plugin>) -> Self {
        self.refine_plugins = plugins;
        self
    }

    pub fn with_policy(mut self, policy: impl VersioningPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub async fn run(self) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let Self {
            options,
            plugins,
            refine_plugins,
            policy,
        } = self;

        let crafted = craft::run(&options, plugins).await?;
        options.check_cancelled()?;

        let shaped = shape::run(&crafted.kitchen)?;
        options.check_cancelled()?;

        let refined = refine::run(&options, crafted, shaped, refine_plugins).await?;
        options.check_cancelled()?;

        let versioned = {
            let graph = refined.kitchen.graph();
            version::run(&graph, &options, policy.as_ref())
        };
        let inline_files = inline_files(&refined, &versioned);
        let output = BuildOutput {
            manifest: versioned.manifest,
            files: versioned.files,
            inline_files,
        };

        log!(
            "build";
            "{}, {} in {:.2?}",
            plural_count(output.files.len(), "file"),
            plural_count(output.inline_files.len(), "inline resource"),
            started.elapsed()
        );
        Ok(output)
    }
}

/// Final text of every crafted inline resource, keyed next to its parent.
///
/// Inline resources live inside their parent's output; this records what
/// each one became, for reports and tests.
fn inline_files(refined: &refine::Refined, versioned: &version::Versioned) -> BTreeMap<String, Content> {
    let plan = &refined.plan;
    let graph = plan.craft().graph();
    let mut out = BTreeMap::new();

    for raw in graph.reachable_from_entries() {
        let Some(info) = graph.get(&raw) else { continue };
        let (Some(site), Some(content)) = (&info.inline_site, &info.content) else {
            continue;
        };
        let Some(parent_path) = outermost_parent(&graph, &site.parent_url)
            .and_then(|parent| plan.build_url_of(&parent))
            .and_then(|build_url| versioned.file_paths.get(build_url))
        else {
            continue;
        };
        let extension = info.url_type.map_or("txt", |t| t.inline_extension());
        let key = format!("{parent_path}@L{}C{}.{extension}", site.line, site.column);
        let content = match content.as_text() {
            Some(text) => Content::Text(replace_reference_tokens(text, |id| {
                let target = graph.reference(id)?.url.as_ref()?;
                let build_url = plan.build_url_of(target)?;
                versioned.specifiers.get(build_url).cloned()
            })),
            None => content.clone(),
        };
        out.insert(key, content);
    }
    out
}

/// The first non-inline node up the inline chain starting at `url`.
fn outermost_parent(graph: &UrlGraph, url: &Url) -> Option<Url> {
    let mut current = url.clone();
    for _ in 0..graph.len() {
        let info = graph.get(&current)?;
        match &info.inline_site {
            Some(site) if info.is_inline => current = site.parent_url.clone(),
            _ => return Some(current),
        }
    }
    None
}
