//! `[build]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [build]
//! root = "src"                  # Source directory, relative to simmer.toml
//! output = "dist"               # Build directory
//! entries = ["index.html"]      # Entry points, relative to root
//! assets_dir = "assets"         # Non-entry files go under output/assets/<type>/
//! base = "/"                    # Prefix of generated specifiers
//! ignore = ["/vendor/"]         # URLs matching any pattern are left untouched
//! manifest = true               # Write manifest.json
//! clean = false                 # Empty output first
//!
//! [build.versioning]
//! enable = true
//! method = "filename"           # or "search_param"
//! length = 8
//! import_map = true
//! global_lookup = true
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::build::{VersioningMethod, VersioningOptions};

/// Build settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub root: PathBuf,
    pub output: PathBuf,
    pub entries: Vec<String>,
    pub assets_dir: String,
    pub base: String,
    /// Regex patterns matched against absolute URLs.
    pub ignore: Vec<String>,
    pub manifest: bool,
    pub clean: bool,
    pub versioning: VersioningConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("src"),
            output: PathBuf::from("dist"),
            entries: vec!["index.html".to_string()],
            assets_dir: "assets".to_string(),
            base: "/".to_string(),
            ignore: Vec::new(),
            manifest: true,
            clean: false,
            versioning: VersioningConfig::default(),
        }
    }
}

/// `[build.versioning]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    pub enable: bool,
    pub method: VersioningMethod,
    /// Hex characters of the content hash kept in versions.
    pub length: usize,
    /// Version module imports through an import map.
    pub import_map: bool,
    /// Version workers and `new URL()` through `globalThis.__v__`.
    pub global_lookup: bool,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        let options = VersioningOptions::default();
        Self {
            enable: options.enable,
            method: options.method,
            length: options.length,
            import_map: options.import_map,
            global_lookup: options.global_lookup,
        }
    }
}

impl VersioningConfig {
    pub fn to_options(&self) -> VersioningOptions {
        VersioningOptions {
            enable: self.enable,
            method: self.method,
            length: self.length,
            import_map: self.import_map,
            global_lookup: self.global_lookup,
        }
    }
}
