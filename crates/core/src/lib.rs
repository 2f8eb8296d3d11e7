//! Offline builder for the storytelling app's soundscapes.
//!
//! Downloads source recordings, condenses long ones to their most energetic
//! passages, levels each layer by mix role and renders the per-story mixes
//! into a fixed directory layout.

pub mod audio;
pub mod builder;
pub mod condense;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod layout;
pub mod mix;
pub mod report;
pub mod types;

pub use builder::{run_pipeline, Builder};
pub use config::PipelineConfig;
pub use report::BuildReport;
