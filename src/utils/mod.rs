//! Small helpers shared across the kitchen, the build and the dev server.

pub mod mime;
pub mod plural;
pub mod timestamp;
pub mod urls;
