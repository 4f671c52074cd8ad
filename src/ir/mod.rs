//! Intermediate representation
//!
//! The IR is the language-neutral contract between the normalizer and the
//! target emitters. It is built once per run, migrated to the current
//! version, rewritten by transformers, validated and then treated as frozen.

pub mod convert;
pub mod graph;
pub mod types;
pub mod validate;
pub mod versioning;

pub use convert::{attach_capabilities, attach_notifications, attach_templates, convert_from_normalizer};
pub use graph::{build_dependency_graph, validate_service_dependencies};
pub use types::*;
pub use validate::validate_ir_semantics;
pub use versioning::{migrate_to_current, to_canonical_json, IR_VERSION_CURRENT};
