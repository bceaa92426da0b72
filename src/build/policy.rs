//! Where a reference gets the version of its target from.
//!
//! Writing the version into the specifier is always correct, but it makes
//! the parent's own content (and so its version) change whenever the
//! dependency changes. An import map or a global lookup function keeps the
//! parent's text stable and moves the mapping into the HTML page instead.

use super::VersioningOptions;
use crate::graph::{Reference, ReferenceKind, UrlType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningVia {
    /// Versioned path written into the parent
    Specifier,
    /// Unversioned path, mapped by an injected `<script type="importmap">`
    ImportMap,
    /// `globalThis.__v__("path")`, defined by an injected script
    GlobalLookup,
}

/// Decides, per reference, how the version of its target is delivered.
///
/// The build still falls back to [`VersioningVia::Specifier`] where an
/// indirection cannot work, such as a resource no HTML page loads.
pub trait VersioningPolicy: Send + Sync {
    fn via(&self, reference: &Reference) -> VersioningVia;
}

/// Module imports go through the import map, workers and `new URL`
/// through the global lookup, everything else is versioned in place.
#[derive(Debug, Clone, Copy)]
pub struct DefaultVersioningPolicy {
    pub import_map: bool,
    pub global_lookup: bool,
}

impl DefaultVersioningPolicy {
    pub fn new(options: &VersioningOptions) -> Self {
        Self {
            import_map: options.import_map,
            global_lookup: options.global_lookup,
        }
    }
}

impl VersioningPolicy for DefaultVersioningPolicy {
    fn via(&self, reference: &Reference) -> VersioningVia {
        match reference.kind {
            ReferenceKind::ScriptImport | ReferenceKind::ScriptDynamicImport
                if self.import_map && reference.expected_type == Some(UrlType::JsModule) =>
            {
                VersioningVia::ImportMap
            }
            ReferenceKind::ScriptWorker | ReferenceKind::ScriptNewUrl if self.global_lookup => {
                VersioningVia::GlobalLookup
            }
            _ => VersioningVia::Specifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(import_map: bool, global_lookup: bool) -> DefaultVersioningPolicy {
        DefaultVersioningPolicy {
            import_map,
            global_lookup,
        }
    }

    fn import() -> Reference {
        Reference::new(ReferenceKind::ScriptImport, "./a.js").expecting(UrlType::JsModule)
    }

    #[test]
    fn test_defaults() {
        let policy = policy(true, true);
        assert_eq!(policy.via(&import()), VersioningVia::ImportMap);
        let worker = Reference::new(ReferenceKind::ScriptWorker, "./w.js");
        assert_eq!(policy.via(&worker), VersioningVia::GlobalLookup);
        let style = Reference::new(ReferenceKind::StyleUrl, "./bg.png");
        assert_eq!(policy.via(&style), VersioningVia::Specifier);
    }

    #[test]
    fn test_disabled_indirections_version_in_place() {
        let policy = policy(false, false);
        assert_eq!(policy.via(&import()), VersioningVia::Specifier);
        let url = Reference::new(ReferenceKind::ScriptNewUrl, "./logo.png");
        assert_eq!(policy.via(&url), VersioningVia::Specifier);
    }
}
