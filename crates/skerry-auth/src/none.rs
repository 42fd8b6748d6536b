//! The trivial `none` protocol: the server accepts the first request.

use bytes::Bytes;
use skerry_types::EntityName;

use crate::error::AuthError;
use crate::handler::{AuthClientHandler, AuthProtocol, AuthStatus};

/// Handler for [`AuthProtocol::None`]. Stateless: every request is
/// empty and any non-error reply completes the handshake.
#[derive(Debug, Default)]
pub struct NoneAuth;

impl NoneAuth {
    /// Create the handler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthClientHandler for NoneAuth {
    fn protocol(&self) -> AuthProtocol {
        AuthProtocol::None
    }

    fn init(&mut self, _name: &EntityName) {}

    fn build_request(&mut self) -> Result<Bytes, AuthError> {
        Ok(Bytes::new())
    }

    fn handle_response(&mut self, result: i32, _payload: Bytes) -> Result<AuthStatus, AuthError> {
        if result < 0 {
            return Err(AuthError::Denied(result));
        }
        Ok(AuthStatus::Done)
    }

    fn need_tickets(&self) -> bool {
        false
    }

    fn set_want_keys(&mut self, _want: u32) {}

    fn set_global_id(&mut self, _global_id: u64) {}

    fn reset(&mut self) {}

    fn tick(&mut self) {}

    fn build_rotating_request(&self) -> Option<Bytes> {
        None
    }
}
