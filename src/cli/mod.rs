//! Command-line interface module.

mod args;
pub mod build;
pub mod dev;
pub mod shutdown;

pub use args::{Cli, Commands};

use std::path::Path;

use crate::config::SimmerConfig;

/// Discover the config from the working directory and apply CLI overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<SimmerConfig> {
    let cwd = std::env::current_dir()?;
    let mut config = SimmerConfig::discover(&cwd, &cli.config)?;
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut SimmerConfig, cli: &Cli) {
    if let Some(root) = &cli.root {
        config.build.root.clone_from(root);
    }
    match &cli.command {
        Commands::Build { output, clean } => {
            if let Some(output) = output {
                config.build.output.clone_from(output);
            }
            config.build.clean |= *clean;
        }
        Commands::Dev {
            interface,
            port,
            no_watch,
        } => {
            if let Some(interface) = interface {
                config.dev.interface = *interface;
            }
            if let Some(port) = port {
                config.dev.port = *port;
            }
            if *no_watch {
                config.dev.watch = false;
            }
        }
    }
}

/// `path` relative to the working directory when possible, for log lines.
pub(crate) fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::*;
    use crate::config::test_parse_config;

    fn overridden(config: &str, args: &[&str]) -> SimmerConfig {
        let mut config = test_parse_config(config);
        let cli = Cli::try_parse_from(args).unwrap();
        apply_overrides(&mut config, &cli);
        config
    }

    #[test]
    fn test_build_overrides() {
        let config = overridden(
            "[build]\noutput = \"public\"",
            &["simmer", "--root", "web", "build", "-o", "out", "-c"],
        );
        assert_eq!(config.build.root, PathBuf::from("web"));
        assert_eq!(config.build.output, PathBuf::from("out"));
        assert!(config.build.clean);
    }

    #[test]
    fn test_build_keeps_config_without_flags() {
        let config = overridden("[build]\noutput = \"public\"\nclean = true", &["simmer", "build"]);
        assert_eq!(config.build.output, PathBuf::from("public"));
        assert!(config.build.clean);
    }

    #[test]
    fn test_dev_overrides() {
        let config = overridden("[dev]\nport = 3000", &["simmer", "dev", "-p", "4000", "--no-watch"]);
        assert_eq!(config.dev.port, 4000);
        assert!(!config.dev.watch);

        let config = overridden("[dev]\nport = 3000", &["simmer", "dev"]);
        assert_eq!(config.dev.port, 3000);
        assert!(config.dev.watch);
    }
}
