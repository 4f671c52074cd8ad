//! Plan / apply protocol
//!
//! A plan is a reproducible description of what a build would change: input
//! and workspace hashes, diagnostics, and the file change set with content.
//! Applying a plan re-checks the hashes before touching the workspace.

mod apply;
mod build;
pub mod hash;
mod io;
mod types;
mod validate;

pub use apply::{apply_plan, apply_plan_with};
pub use build::{build_plan, PlanOptions, PIPELINE_ERROR};
pub use io::{read_plan, write_plan};
pub use types::*;
pub use validate::validate_plan;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan is nil")]
    Nil,

    #[error("schemaVersion is required")]
    MissingSchemaVersion,

    #[error("unsupported schemaVersion: {0}")]
    UnsupportedSchemaVersion(String),

    #[error("planVersion is required")]
    MissingPlanVersion,

    #[error("workspaceRoot is required")]
    MissingWorkspaceRoot,

    #[error("status is required")]
    MissingStatus,

    #[error("plan precondition failed: input hash mismatch")]
    InputHashMismatch,

    #[error("plan precondition failed: workspace hash mismatch")]
    WorkspaceHashMismatch,

    #[error("apply phase is not implemented yet")]
    ApplyNotImplemented,

    #[error("invalid change for {path:?}: {reason}")]
    InvalidChange { path: String, reason: String },

    #[error("content hash mismatch for {path:?}: expected {expected}, got {actual}")]
    ContentHashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("plan JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlanError {
    pub(crate) fn io(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.display().to_string(),
            source,
        }
    }
}
