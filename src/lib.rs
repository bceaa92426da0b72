//! Simmer - a graph-based incremental transformation engine for web assets.
//!
//! Sources are cooked on demand by a [`kitchen::Kitchen`], one URL at a
//! time, through the hooks of ordered [`plugin::Plugin`]s. The resulting
//! [`graph::UrlGraph`] drives both the development server (hot updates,
//! see [`hmr`] and [`dev`]) and production builds ([`build`]).

pub mod build;
pub mod cli;
pub mod config;
pub mod content;
pub mod dev;
pub mod error;
pub mod graph;
pub mod hmr;
pub mod kitchen;
pub mod logger;
pub mod plugin;
pub mod plugins;
pub mod utils;
