//! Generation orchestration
//!
//! Target plugins register [`Step`]s into a [`StepRegistry`]. Execution gates
//! each step on the target's capabilities, stages output in an
//! [`ArtifactSink`] and reports progress as [`StepEvent`]s.

pub mod artifacts;
pub mod manifest;
pub mod steps;

pub use artifacts::{Artifact, ArtifactSink};
pub use manifest::{read_manifest, write_manifest, ArtifactManifest};
pub use steps::{RegistryError, Step, StepEvent, StepEventSink, StepRegistry, StepStatus};
