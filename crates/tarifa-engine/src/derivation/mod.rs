//! Customer card derivation
//!
//! - [`pipeline`]: pure transform from one parent revision to customer entries
//! - [`worker`]: bounded pool that rebuilds many stale cards at once

pub mod pipeline;
pub mod worker;

pub use pipeline::{apply_margin, is_profitable, DerivationPipeline, DerivationSettings, DerivedTable};
pub use worker::{run_bounded, RebuildReport};
