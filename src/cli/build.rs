//! `simmer build`: run the full pipeline and write the output directory.

use anyhow::Result;

use super::{display_path, shutdown};
use crate::build::{BuildOrchestrator, BuildOutput};
use crate::config::SimmerConfig;
use crate::plugins;
use crate::utils::plural::plural_count;
use crate::{debug, log};

/// Build the project described by `config` and write it to disk.
pub async fn build_project(config: &SimmerConfig) -> Result<BuildOutput> {
    let options = config.build_options()?;
    shutdown::register_signal(options.signal.clone());

    let output = BuildOrchestrator::new(options, plugins::standard(Vec::new()))
        .run()
        .await?;

    let dir = config.output_dir();
    let written = output.write_to_disk(&dir, config.build.manifest, config.build.clean)?;
    log!("build"; "{} written to {}", plural_count(written, "file"), display_path(&dir));
    report_manifest(&output);
    Ok(output)
}

fn report_manifest(output: &BuildOutput) {
    if output.manifest.is_empty() {
        return;
    }
    log!("build"; "{} versioned", plural_count(output.manifest.len(), "file"));
    for (from, to) in &output.manifest {
        debug!("build"; "{from} -> {to}");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn project(files: &[(&str, &str)], config: &str) -> (TempDir, SimmerConfig) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let path = dir.path().join("src").join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        fs::write(dir.path().join("simmer.toml"), config).unwrap();
        let config = SimmerConfig::load(&dir.path().join("simmer.toml")).unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn test_build_writes_output() {
        let (dir, config) = project(
            &[
                ("index.html", "<script type=\"module\" src=\"./main.js\"></script>"),
                ("main.js", "console.log(1);"),
            ],
            "[build.versioning]\nenable = false",
        );

        let output = build_project(&config).await.unwrap();
        assert!(output.manifest.is_empty());

        let dist = dir.path().join("dist");
        assert!(dist.join("index.html").is_file());
        assert!(output.files.contains_key("assets/js/main.js"));
        assert_eq!(fs::read_to_string(dist.join("assets/js/main.js")).unwrap(), "console.log(1);");
    }

    #[tokio::test]
    async fn test_build_clean_removes_stale_files() {
        let (dir, config) = project(
            &[("index.html", "<p>hi</p>")],
            "[build]\nclean = true\nmanifest = false",
        );
        let dist = dir.path().join("dist");
        fs::create_dir_all(&dist).unwrap();
        fs::write(dist.join("stale.txt"), "old").unwrap();

        build_project(&config).await.unwrap();
        assert!(dist.join("index.html").is_file());
        assert!(!dist.join("stale.txt").exists());
    }

    #[tokio::test]
    async fn test_build_missing_entry_fails() {
        let (dir, config) = project(&[], "");
        assert!(build_project(&config).await.is_err());
        assert!(!dir.path().join("dist/index.html").exists());
    }
}
