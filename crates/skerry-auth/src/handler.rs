//! The auth handler capability trait and protocol selection.

use std::sync::Arc;

use bytes::Bytes;
use skerry_types::EntityName;

use crate::error::AuthError;
use crate::keyring::{Keyring, SharedRotating};
use crate::none::NoneAuth;
use crate::ticket::TicketAuth;

/// Authentication protocols this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthProtocol {
    /// No authentication.
    None,
    /// HMAC challenge/response with service tickets and rotating keys.
    Ticket,
}

impl AuthProtocol {
    /// Wire id of this protocol.
    pub fn id(&self) -> u32 {
        match self {
            AuthProtocol::None => 1,
            AuthProtocol::Ticket => 2,
        }
    }

    /// Decode a wire protocol id.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(AuthProtocol::None),
            2 => Some(AuthProtocol::Ticket),
            _ => None,
        }
    }

    /// Configuration name of this protocol.
    pub fn name(&self) -> &'static str {
        match self {
            AuthProtocol::None => "none",
            AuthProtocol::Ticket => "ticket",
        }
    }
}

/// Outcome of feeding a server reply to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Handshake complete.
    Done,
    /// The handler produced a follow-up; send another request.
    Again,
}

/// Capability set of one protocol handler.
///
/// Handlers are plain state machines: they never touch the network and
/// never await. The session client owns exactly one at a time and swaps
/// it when the server selects a different protocol.
pub trait AuthClientHandler: Send {
    /// Protocol this handler implements.
    fn protocol(&self) -> AuthProtocol;

    /// Bind the handler to the authenticating principal.
    fn init(&mut self, name: &EntityName);

    /// Build the payload for the next request.
    fn build_request(&mut self) -> Result<Bytes, AuthError>;

    /// Feed a server reply. [`AuthStatus::Again`] means another round is
    /// needed; errors are terminal for the handshake.
    fn handle_response(&mut self, result: i32, payload: Bytes) -> Result<AuthStatus, AuthError>;

    /// True when the session ticket should be renewed.
    fn need_tickets(&self) -> bool;

    /// Record which service key classes the principal wants delivered.
    fn set_want_keys(&mut self, want: u32);

    /// Record the server-assigned global id.
    fn set_global_id(&mut self, global_id: u64);

    /// Restart the handshake from scratch.
    fn reset(&mut self);

    /// Periodic housekeeping (key pruning).
    fn tick(&mut self);

    /// Build a rotating-key refresh payload, if this protocol has one
    /// and the handler is far enough along to authenticate it.
    fn build_rotating_request(&self) -> Option<Bytes>;
}

/// Instantiate the handler for a server-selected protocol id.
///
/// Returns `None` for ids this client does not implement.
pub fn create_handler(
    protocol: u32,
    keyring: Arc<Keyring>,
    rotating: SharedRotating,
) -> Option<Box<dyn AuthClientHandler>> {
    match AuthProtocol::from_id(protocol)? {
        AuthProtocol::None => Some(Box::new(NoneAuth::new())),
        AuthProtocol::Ticket => Some(Box::new(TicketAuth::new(keyring, rotating))),
    }
}

/// An ordered list of acceptable auth protocols, parsed from
/// configuration strings like `"ticket, none"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMethodList {
    methods: Vec<AuthProtocol>,
}

impl AuthMethodList {
    /// Parse a configuration string. Unknown names are skipped with a
    /// warning; separators are commas, semicolons, or whitespace.
    pub fn parse(list: &str) -> Self {
        let mut methods = Vec::new();
        for token in list.split([',', ';', ' ']).filter(|t| !t.is_empty()) {
            match token {
                "none" => methods.push(AuthProtocol::None),
                "ticket" => methods.push(AuthProtocol::Ticket),
                other => tracing::warn!(method = other, "ignoring unknown auth method"),
            }
        }
        Self { methods }
    }

    /// True when `proto` is acceptable.
    pub fn is_supported(&self, proto: AuthProtocol) -> bool {
        self.methods.contains(&proto)
    }

    /// Wire protocol ids, ascending, deduplicated.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.methods.iter().map(AuthProtocol::id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// True when no methods were configured.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
