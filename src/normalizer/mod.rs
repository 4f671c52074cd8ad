//! Normalizer
//!
//! Turns unified CUE package values into typed records. Each `extract_*`
//! operation reads its package defensively: absent keys produce empty
//! records, shape errors fail the operation, and non-fatal findings go to the
//! warning sink.
//!
//! ```text
//! domain ──► extract_entities ─┐
//! api    ──► extract_services ─┼─► NormalizedModel ──► ir::convert
//!            extract_endpoints │
//! repo   ──► repositories ─────┤   (+ projections, FSM checks)
//! infra  ──► auth/config/... ──┘
//! ```

mod endpoint;
mod entity;
mod events;
pub mod fsm;
pub mod helpers;
pub mod infra;
pub mod infra_registry;
pub mod projection;
mod repo;
mod scenarios;
mod service;
mod templates;
pub mod types;
mod views;

pub use types::*;

use crate::diagnostics::{Warning, WarningSink};

/// Extraction front; borrows the run's warning sink
pub struct Normalizer<'a> {
    sink: &'a dyn WarningSink,
}

impl<'a> Normalizer<'a> {
    pub fn new(sink: &'a dyn WarningSink) -> Self {
        Self { sink }
    }

    pub(crate) fn warn(&self, warning: Warning) {
        self.sink.warn(warning);
    }
}
