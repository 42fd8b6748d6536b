//! Monitor session client.
//!
//! The [`MonClient`] locates, authenticates against, and maintains
//! subscriptions to a small cluster of monitor nodes:
//!
//! - [`MonMap`] — the immutable monitor roster and cluster identity.
//! - Hunting: until a monitor answers, the client keeps picking a random
//!   different monitor at a fast tick interval.
//! - Authentication through the pluggable handlers in [`skerry_auth`],
//!   with rotating-key refresh while the session lives.
//! - Topic subscriptions, map version queries, and cluster log shipping.

mod client;
mod config;
mod error;
mod monmap;


use bytes::Bytes;

pub use client::{MapVersion, MonClient, SessionState};
pub use config::MonClientConfig;
pub use error::MonError;
pub use monmap::MonMap;

/// Seam to the cluster log shipper.
///
/// The session client does not interpret log entries; it forwards
/// whatever the log client hands it and routes acks back.
pub trait LogClient: Send + Sync {
    /// Take the next batch of encoded log entries to ship, if any.
    fn get_mon_log_message(&self) -> Option<Bytes>;

    /// True when more entries are waiting after the last batch.
    fn are_pending(&self) -> bool;

    /// An acknowledgement for shipped entries arrived.
    fn handle_log_ack(&self, ack: Bytes);

    /// A new monitor session was established; resend unacked entries.
    fn reset_session(&self);
}
