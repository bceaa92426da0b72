//! Hot reload message protocol.
//!
//! JSON messages pushed from the dev server to connected clients.
//!
//! # Message Types
//!
//! - `hot`: apply updates at the listed boundaries
//! - `full`: reload the page
//! - `connected`: sent once per connection
//! - `error` / `clear_error`: show or hide the error overlay

use serde::{Deserialize, Serialize};

use super::{HotUpdate, Instruction};
use crate::plugin::KitchenContext;

/// An [`Instruction`] with server-relative paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotInstruction {
    pub boundary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_from: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pruned: Vec<String>,
}

/// Hot reload message sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HotReloadMessage {
    /// Updates every boundary can absorb
    Hot {
        instructions: Vec<HotInstruction>,
        /// Change timestamp, used by clients as a cache buster
        timestamp: u64,
    },

    /// Full page reload
    Full {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        declined_by: Option<String>,
    },

    /// Connection established
    Connected {
        /// Server version for compatibility check
        version: String,
    },

    /// Cook error (display overlay, no reload)
    Error {
        path: String,
        error: String,
    },

    /// Clear error overlay (cook succeeded after error)
    #[serde(rename = "clear_error")]
    ClearError,
}

impl HotReloadMessage {
    /// Translate a propagation result for clients of `context`.
    pub fn from_update(update: &HotUpdate, context: &KitchenContext, timestamp: u64) -> Self {
        match update {
            HotUpdate::Hot(instructions) => Self::Hot {
                instructions: instructions
                    .iter()
                    .map(|instruction| HotInstruction::new(instruction, context))
                    .collect(),
                timestamp,
            },
            HotUpdate::Full { reason, declined_by } => Self::Full {
                reason: Some(reason.clone()),
                declined_by: declined_by.as_ref().map(|url| context.server_path(url)),
            },
        }
    }

    pub fn full(reason: impl Into<String>) -> Self {
        Self::Full {
            reason: Some(reason.into()),
            declined_by: None,
        }
    }

    pub fn connected() -> Self {
        Self::Connected {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn error(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Error {
            path: path.into(),
            error: error.into(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"full"}"#.to_string())
    }

    /// Parse from JSON string
    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

impl HotInstruction {
    fn new(instruction: &Instruction, context: &KitchenContext) -> Self {
        Self {
            boundary: context.server_path(&instruction.boundary),
            accepted_from: instruction.accepted_from.as_ref().map(|url| context.server_path(url)),
            pruned: instruction.pruned.iter().map(|url| context.server_path(url)).collect(),
        }
    }
}
