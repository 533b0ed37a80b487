//! Run summaries
//!
//! The coordinator tallies what happened to every page and issue in a
//! [`HarvestStats`]; this module formats it for the terminal.

pub mod stats;

pub use stats::{print_summary, render_summary, HarvestStats, ProjectStats};
