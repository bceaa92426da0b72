//! Build output and writing it to disk.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::content::Content;
use crate::error::BuildError;
use crate::utils::urls;

/// Name of the manifest written next to the output files.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Everything a build produced, keyed by build-relative path.
#[derive(Debug, Default)]
pub struct BuildOutput {
    /// Unversioned path to versioned path, for versioned files only
    pub manifest: BTreeMap<String, String>,
    /// Files written to disk
    pub files: BTreeMap<String, Content>,
    /// Resources that stayed inline in their parent, keyed
    /// `<parent path>@L<line>C<column>.<ext>`
    pub inline_files: BTreeMap<String, Content>,
}

impl BuildOutput {
    /// Output path of the file built from unversioned path `path`.
    pub fn resolve<'a>(&'a self, path: &'a str) -> &'a str {
        self.manifest.get(path).map_or(path, String::as_str)
    }

    /// Text of the file built from unversioned path `path`.
    pub fn text(&self, path: &str) -> Option<&str> {
        let resolved = self.resolve(path);
        let file = resolved.split_once('?').map_or(resolved, |(file, _)| file);
        self.files.get(file).and_then(Content::as_text)
    }

    /// Write every file under `dir`, plus `manifest.json` when `manifest`.
    ///
    /// With `clean`, `dir` is emptied first. Returns the number of files
    /// written, manifest excluded.
    pub fn write_to_disk(&self, dir: &Path, manifest: bool, clean: bool) -> Result<usize, BuildError> {
        if clean && dir.exists() {
            fs::remove_dir_all(dir).map_err(|err| BuildError::Io(dir.to_path_buf(), err))?;
        }
        fs::create_dir_all(dir).map_err(|err| BuildError::Io(dir.to_path_buf(), err))?;

        self.files
            .par_iter()
            .try_for_each(|(path, content)| write_file(&output_path(dir, path), content.as_bytes()))?;

        if manifest {
            let json = serde_json::to_string_pretty(&self.manifest)?;
            write_file(&dir.join(MANIFEST_FILE), json.as_bytes())?;
        }
        Ok(self.files.len())
    }
}

fn output_path(dir: &Path, path: &str) -> PathBuf {
    let file = path.split_once('?').map_or(path, |(file, _)| file);
    dir.join(urls::decode(file).as_ref())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BuildError> {
    let io_err = |err: io::Error| BuildError::Io(path.to_path_buf(), err);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, bytes).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn output() -> BuildOutput {
        let mut output = BuildOutput::default();
        output.files.insert("index.html".into(), Content::from("<p>hi</p>"));
        output.files.insert("assets/js/a-1a2b3c4d.js".into(), Content::from("export {}"));
        output.files.insert("assets/other/my%20logo.png".into(), Content::from(vec![1u8, 2, 3]));
        output
            .manifest
            .insert("assets/js/a.js".into(), "assets/js/a-1a2b3c4d.js".into());
        output
    }

    #[test]
    fn test_text_follows_manifest() {
        let output = output();
        assert_eq!(output.text("assets/js/a.js"), Some("export {}"));
        assert_eq!(output.text("index.html"), Some("<p>hi</p>"));
        assert_eq!(output.text("missing.js"), None);
    }

    #[test]
    fn test_write_to_disk() {
        let dir = TempDir::new().unwrap();
        let written = output().write_to_disk(dir.path(), true, false).unwrap();

        assert_eq!(written, 3);
        assert_eq!(fs::read_to_string(dir.path().join("index.html")).unwrap(), "<p>hi</p>");
        assert_eq!(fs::read(dir.path().join("assets/other/my logo.png")).unwrap(), [1, 2, 3]);
        let manifest = fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(manifest.contains("\"assets/js/a.js\": \"assets/js/a-1a2b3c4d.js\""));
    }

    #[test]
    fn test_clean_removes_stale_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("stale.txt"), "old").unwrap();

        output().write_to_disk(dir.path(), false, true).unwrap();
        assert!(!dir.path().join("stale.txt").exists());
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(dir.path().join("index.html").exists());
    }
}
