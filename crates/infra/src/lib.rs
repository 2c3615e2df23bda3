//! Minstrel platform collaborators
//!
//! Device output and capture through CPAL, sample-rate adaptation, and the
//! visualization service that feeds displays from a running engine.

pub mod audio;
pub mod visual;

pub use visual::{ChannelLevel, VisualFrame, VisualizationService};
