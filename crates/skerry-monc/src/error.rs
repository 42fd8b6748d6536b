//! Error type for the monitor client.

use skerry_auth::AuthError;
use skerry_net::DecodeError;

/// Errors surfaced by monitor client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MonError {
    /// The blocking call's deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// The session was reopened; the request was aborted and may be
    /// retried against the new session.
    #[error("monitor session reopened, request aborted")]
    SessionReset,

    /// The client was shut down.
    #[error("monitor client shut down")]
    Shutdown,

    /// None of our auth protocols are acceptable to the monitor.
    #[error("no mutually supported auth protocol")]
    NotSupported,

    /// The authentication handshake failed.
    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    /// A reply failed to decode.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// The monitor map has no usable monitors.
    #[error("monitor map is empty")]
    EmptyMonMap,

    /// A monitor host entry in the configuration could not be parsed.
    #[error("bad monitor host entry {0:?}")]
    BadMonHost(String),

    /// No monitor handed us a map within the attempt limit.
    #[error("could not fetch an initial monitor map")]
    NoMonMap,
}
