//! Error type for filer operations.

use skerry_types::LayoutError;

use crate::objecter::OsdError;

/// Errors produced by striped file operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FilerError {
    /// The striping layout is invalid.
    #[error("layout: {0}")]
    Layout(#[from] LayoutError),

    /// An object operation failed.
    #[error("object op: {0}")]
    Osd(#[from] OsdError),

    /// A backward probe was started at or below its lower bound.
    #[error("backward probe start {start} must exceed lower bound {lower_bound}")]
    InvalidProbe {
        /// Requested probe start.
        start: u64,
        /// Caller-supplied lower bound.
        lower_bound: u64,
    },
}
