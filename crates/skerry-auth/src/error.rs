//! Error type for authentication.

use skerry_net::DecodeError;
use skerry_types::EntityName;

/// Errors produced while negotiating or maintaining authentication.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The keyring holds no secret for the principal.
    #[error("no secret in keyring for {0}")]
    MissingKey(EntityName),

    /// A request was built before the handler was initialized.
    #[error("auth handler not initialized")]
    NotInitialized,

    /// A proof request was built before the server sent its challenge.
    #[error("no server challenge received yet")]
    NoChallenge,

    /// The server rejected the credentials.
    #[error("server denied authentication (result {0})")]
    Denied(i32),

    /// The server's proof of the shared secret did not verify.
    #[error("server proof verification failed")]
    BadServerProof,

    /// An auth payload failed to decode.
    #[error("auth payload decode: {0}")]
    Decode(#[from] DecodeError),
}
