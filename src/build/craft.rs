//! Craft: cook the source tree from its entry points.

use std::sync::Arc;

use url::Url;

use super::{BuildOptions, reference_token};
use crate::error::BuildError;
use crate::kitchen::{GraphLoader, Kitchen};
use crate::plugin::{AppliesDuring, KitchenContext, Phase, Plugin};
use crate::utils::plural::plural_count;
use crate::{debug, log};

pub(super) struct Crafted {
    pub kitchen: Arc<Kitchen>,
    /// Entry URLs in the order the options list them
    pub entries: Vec<Url>,
}

/// Write handled references as tokens the refine pass can look up.
///
/// Inline references are left alone: their content is spliced into the
/// parent instead of being pointed at.
fn reference_tokens() -> Plugin {
    Plugin::new("build-reference-tokens")
        .applies_during(AppliesDuring::Phase(Phase::Craft))
        .format_reference(|context, reference| {
            let url = reference.url.as_ref()?;
            (!reference.is_inline && context.should_handle(url)).then(|| reference_token(reference.id))
        })
}

pub(super) async fn run(options: &BuildOptions, plugins: Vec<Plugin>) -> Result<Crafted, BuildError> {
    let context = KitchenContext::new(Phase::Craft, options.root_directory_url.clone())
        .with_build_directory(options.build_directory_url.clone())
        .with_signal(options.signal.clone())
        .with_ignore(options.ignore.clone());
    let mut all = vec![reference_tokens()];
    all.extend(plugins);
    let kitchen = Kitchen::new(context, all);

    let mut entries = Vec::with_capacity(options.entries.len());
    for entry in &options.entries {
        let url = kitchen
            .prepare_entry_point(entry)
            .map_err(|_| BuildError::EntryPoint(entry.clone()))?;
        debug!("craft"; "entry {entry} -> {url}");
        entries.push(url);
    }

    let mut loader = GraphLoader::new(&kitchen);
    for url in &entries {
        loader.load(url.clone());
    }
    let loaded = loader.drain().await?;
    let pruned = kitchen.graph().prune_unused();
    log!(
        "craft";
        "{} cooked, {} pruned",
        plural_count(loaded, "resource"),
        pruned
    );
    Ok(Crafted { kitchen, entries })
}
