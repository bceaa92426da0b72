//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::{net::IpAddr, path::PathBuf};

/// Simmer web asset builder CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: simmer.toml)
    #[arg(short = 'C', long, global = true, default_value = "simmer.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Source directory path (relative to project root)
    #[arg(short, long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub root: Option<PathBuf>,

    /// Print debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the project for production
    #[command(visible_alias = "b")]
    Build {
        /// Output directory path (relative to project root)
        #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
        output: Option<PathBuf>,

        /// Remove the output directory before writing
        #[arg(short, long)]
        clean: bool,
    },

    /// Start development server with hot updates
    #[command(visible_alias = "d")]
    Dev {
        /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
        #[arg(short, long)]
        interface: Option<IpAddr>,

        /// Port number to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not watch files for changes
        #[arg(long)]
        no_watch: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let cli = Cli::try_parse_from(["simmer", "build", "-o", "out", "--clean"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("simmer.toml"));
        assert!(!cli.verbose);
        match cli.command {
            Commands::Build { output, clean } => {
                assert_eq!(output, Some(PathBuf::from("out")));
                assert!(clean);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_dev_args_with_globals() {
        let cli = Cli::try_parse_from(["simmer", "d", "--port", "4000", "--no-watch", "-v", "-C", "alt.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
        match cli.command {
            Commands::Dev { interface, port, no_watch } => {
                assert_eq!(interface, None);
                assert_eq!(port, Some(4000));
                assert!(no_watch);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_requires_command() {
        assert!(Cli::try_parse_from(["simmer"]).is_err());
        assert!(Cli::try_parse_from(["simmer", "dev", "--port", "x"]).is_err());
    }
}
