//! Ready-made plugins.
//!
//! - [`builtin`]: resolution, inline content, dev cache busting
//! - [`fs`]: reading `file:` URLs from disk
//! - [`memory`]: in-memory files with fetch counters
//! - [`scan`]: regex reference scanners for HTML, JS and CSS

pub mod builtin;
pub mod fs;
pub mod memory;
pub mod scan;

use crate::plugin::Plugin;

/// Built-ins, then `user` plugins, then the scanners, then disk access.
///
/// The disk fetcher is low priority, so it runs after every other
/// fetcher wherever it sits in this list.
pub fn standard(user: Vec<Plugin>) -> Vec<Plugin> {
    let mut plugins = builtin::plugins();
    plugins.extend(user);
    plugins.extend(scan::plugins());
    plugins.push(fs::file_url_fetch());
    plugins
}
