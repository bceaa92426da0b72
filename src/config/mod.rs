//! Project configuration from `simmer.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # [build], [build.versioning], [dev]
//! ├── error          # ConfigError
//! ├── util           # config file discovery
//! └── mod.rs         # SimmerConfig (this file)
//! ```
//!
//! Every section and field has a default, so an empty (or missing)
//! `simmer.toml` describes a project with sources in `src/`, an
//! `index.html` entry point and output in `dist/`.

mod error;
pub mod section;
mod util;

pub use error::ConfigError;
pub use section::{BuildConfig, DevConfig, VersioningConfig};
pub use util::find_config_file;

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::build::BuildOptions;
use crate::dev::DevOptions;
use crate::utils::urls;
use crate::{debug, log};

/// Default config file name.
pub const CONFIG_FILE: &str = "simmer.toml";

/// Hex characters in a blake3 hash.
const MAX_VERSION_LENGTH: usize = 64;

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing simmer.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimmerConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project directory, parent of the config file (internal use only)
    #[serde(skip)]
    pub project_root: PathBuf,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub dev: DevConfig,
}

impl SimmerConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load and validate the config file at `path`, warning about unknown fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let (mut config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }

        let path = std::path::absolute(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        config.project_root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.config_path = path;
        config.validate()?;
        Ok(config)
    }

    /// Load `config_name` searched upward from `start`, or defaults rooted at `start`.
    pub fn discover(start: &Path, config_name: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = find_config_file(start, config_name) {
            debug!("config"; "using {}", path.display());
            return Self::load(&path);
        }
        debug!("config"; "no {} found, using defaults", config_name.display());
        let mut config = Self::default();
        config.project_root = std::path::absolute(start).map_err(|err| ConfigError::Io(start.to_path_buf(), err))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring: {}", display_path, fields.join(", "));
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    pub fn validate(&self) -> Result<(), ConfigError> {
        let build = &self.build;
        if build.entries.is_empty() {
            return Err(ConfigError::Validation("[build] entries must not be empty".into()));
        }
        if let Some(entry) = build
            .entries
            .iter()
            .find(|entry| entry.starts_with('/') || urls::has_scheme(entry) || Path::new(entry).is_absolute())
        {
            return Err(ConfigError::Validation(format!(
                "[build] entry `{entry}` must be relative to the root directory"
            )));
        }
        let length = build.versioning.length;
        if length == 0 || length > MAX_VERSION_LENGTH {
            return Err(ConfigError::Validation(format!(
                "[build.versioning] length must be between 1 and {MAX_VERSION_LENGTH}, got {length}"
            )));
        }
        self.ignore_patterns()?;
        Ok(())
    }

    /// `[build] ignore` compiled.
    pub fn ignore_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.build
            .ignore
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|err| ConfigError::Validation(format!("[build] invalid ignore pattern `{pattern}`: {err}")))
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------------

    /// Source directory.
    pub fn root_dir(&self) -> PathBuf {
        self.project_root.join(&self.build.root)
    }

    /// Build directory.
    pub fn output_dir(&self) -> PathBuf {
        self.project_root.join(&self.build.output)
    }

    pub fn root_url(&self) -> Result<Url, ConfigError> {
        directory_url(&self.root_dir())
    }

    pub fn build_url(&self) -> Result<Url, ConfigError> {
        directory_url(&self.output_dir())
    }

    // ------------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------------

    pub fn build_options(&self) -> Result<BuildOptions, ConfigError> {
        let mut options = BuildOptions::new(self.root_url()?, self.build_url()?)
            .with_entries(self.build.entries.iter().cloned())
            .with_base(self.build.base.clone())
            .with_versioning(self.build.versioning.to_options());
        options.assets_dir.clone_from(&self.build.assets_dir);
        options.ignore = self.ignore_patterns()?;
        Ok(options)
    }

    pub fn dev_options(&self) -> Result<DevOptions, ConfigError> {
        let mut options = DevOptions::new(self.root_url()?);
        options.ignore = self.ignore_patterns()?;
        options.handle_http = self.dev.handle_http;
        options.watch = self.dev.watch;
        Ok(options)
    }
}

fn directory_url(path: &Path) -> Result<Url, ConfigError> {
    Url::from_directory_path(path)
        .map_err(|()| ConfigError::Validation(format!("`{}` is not an absolute directory path", path.display())))
}

/// Parse a config for tests, failing on unknown fields.
#[cfg(test)]
pub fn test_parse_config(content: &str) -> SimmerConfig {
    let (parsed, ignored) = SimmerConfig::parse_with_ignored(content).unwrap();
    assert!(ignored.is_empty(), "test config has unknown fields: {ignored:?}");
    parsed
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::build::VersioningMethod;

    fn rooted(content: &str) -> SimmerConfig {
        let mut config = test_parse_config(content);
        config.project_root = PathBuf::from("/project");
        config
    }

    #[test]
    fn test_from_str() {
        let config = SimmerConfig::from_str("[dev]\nport = 3000").unwrap();
        assert_eq!(config.dev.port, 3000);
        assert!(SimmerConfig::from_str("[dev]\nport = \"x\"").is_err());
    }

    #[test]
    fn test_unknown_fields_collected() {
        let (_, ignored) = SimmerConfig::parse_with_ignored("[build]\nouput = \"out\"\n[extra]\nx = 1").unwrap();
        assert_eq!(ignored, vec!["build.ouput", "extra"]);
    }

    #[test]
    fn test_validate() {
        assert!(rooted("").validate().is_ok());

        let errors = [
            "[build]\nentries = []",
            "[build]\nentries = [\"/index.html\"]",
            "[build]\nentries = [\"https://example.com/index.html\"]",
            "[build.versioning]\nlength = 0",
            "[build.versioning]\nlength = 65",
            "[build]\nignore = [\"(unclosed\"]",
        ];
        for content in errors {
            let err = rooted(content).validate().unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{content}: {err}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_urls() {
        let config = rooted("[build]\nroot = \"web\"\noutput = \"out/site\"");
        assert_eq!(config.root_url().unwrap().as_str(), "file:///project/web/");
        assert_eq!(config.build_url().unwrap().as_str(), "file:///project/out/site/");
    }

    #[cfg(unix)]
    #[test]
    fn test_build_options() {
        let config = rooted(
            "[build]\nentries = [\"a.html\"]\nbase = \"/static/\"\nassets_dir = \"static\"\nignore = [\"/vendor/\"]\n\
             [build.versioning]\nmethod = \"search_param\"",
        );
        let options = config.build_options().unwrap();
        assert_eq!(options.root_directory_url.as_str(), "file:///project/src/");
        assert_eq!(options.build_directory_url.as_str(), "file:///project/dist/");
        assert_eq!(options.entries, vec!["a.html"]);
        assert_eq!(options.base, "/static/");
        assert_eq!(options.assets_dir, "static");
        assert_eq!(options.ignore.len(), 1);
        assert_eq!(options.versioning.method, VersioningMethod::SearchParam);
    }

    #[cfg(unix)]
    #[test]
    fn test_dev_options() {
        let config = rooted("[dev]\nwatch = false\nhandle_http = true");
        let options = config.dev_options().unwrap();
        assert_eq!(options.root_directory_url.as_str(), "file:///project/src/");
        assert!(!options.watch);
        assert!(options.handle_http);
    }

    #[test]
    fn test_load_sets_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[dev]\nport = 4000\nwatch = false").unwrap();

        let config = SimmerConfig::load(&path).unwrap();
        assert_eq!(config.dev.port, 4000);
        assert_eq!(config.config_path, path);
        assert_eq!(config.project_root, dir.path());
        assert_eq!(config.root_dir(), dir.path().join("src"));
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[build]\nentries = []").unwrap();
        assert!(matches!(SimmerConfig::load(&path), Err(ConfigError::Validation(_))));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(SimmerConfig::load(&missing), Err(ConfigError::Io(..))));
    }

    #[test]
    fn test_discover_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = SimmerConfig::discover(dir.path(), Path::new("no-such-simmer-config.toml")).unwrap();
        assert_eq!(config.project_root, dir.path());
        assert_eq!(config.output_dir(), dir.path().join("dist"));
    }
}
