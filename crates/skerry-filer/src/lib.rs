//! Striped file operations over an object service.
//!
//! The [`Filer`] maps file byte ranges onto objects (via
//! [`skerry_striper`]) and drives compound operations through the
//! [`ObjectClient`] seam: striped read/write, truncate, zero-fill, bulk
//! range purge, and size/mtime probing across sparse object sets.

mod error;
mod filer;
mod objecter;
mod probe;
mod purge;

#[cfg(test)]
mod tests;

pub use error::FilerError;
pub use filer::Filer;
pub use objecter::{ObjectClient, ObjectStat, OsdError};
pub use probe::ProbeResult;
pub use purge::MAX_PURGE_PARALLEL;
