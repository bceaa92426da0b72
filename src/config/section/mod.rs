//! Configuration section definitions.
//!
//! | Module  | TOML Section                    | Purpose                     |
//! |---------|---------------------------------|-----------------------------|
//! | `build` | `[build]`, `[build.versioning]` | Paths, entries, versioning  |
//! | `dev`   | `[dev]`                         | Development server          |

mod build;
mod dev;

pub use build::{BuildConfig, VersioningConfig};
pub use dev::DevConfig;
