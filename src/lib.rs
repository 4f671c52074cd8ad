//! ANG compiler core
//!
//! Turns a workspace of CUE intent files into deterministic backend
//! artifacts. Every build flows through one chain:
//!
//! ```text
//! cue/ ──► loader ──► normalizer ──► ir (convert, migrate, transform, validate)
//!                                      │
//!                     targets + capabilities ──► step registry ──► ArtifactSink
//!                                                                    │
//!                               build (flush + manifest) | plan ──► apply
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ang::pipeline::{build, PipelineOptions};
//!
//! let report = build(std::path::Path::new("."), &PipelineOptions::default())?;
//! println!("{} files written", report.files_written);
//! # Ok::<(), anyhow::Error>(())
//! ```

// Ambient: configuration, diagnostics, error envelope, logging
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod telemetry;

// Front end
pub mod loader;
pub mod normalizer;

// Intermediate representation
pub mod ir;
pub mod transformers;

// Emission
pub mod capabilities;
pub mod generator;
pub mod render;
pub mod targets;

// Orchestration and workspace editing
pub mod doctor;
pub mod lock;
pub mod merge;
pub mod pipeline;
pub mod plan;

/// Version stamped into manifests, plans and plugin compatibility checks
pub const COMPILER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::CompilerConfig;
pub use diagnostics::{CollectingSink, Warning, WarningSink};
pub use error::{ContractError, Stage, STABLE_ERROR_CODES};
pub use ir::{Schema, IR_VERSION_CURRENT};
pub use pipeline::{build, build_ir, compile, run_pipeline, BuildReport, CompileOutput, PipelineOptions};
pub use plan::{apply_plan, build_plan, read_plan, validate_plan, write_plan, BuildPlan, PlanOptions};
