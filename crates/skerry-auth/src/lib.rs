//! Pluggable monitor authentication.
//!
//! The session client drives authentication through the
//! [`AuthClientHandler`] capability trait. A handler is instantiated at
//! runtime from the protocol id the server selects ([`create_handler`]);
//! two protocols are built in:
//!
//! - [`AuthProtocol::None`] — trivially succeeds on the first reply.
//! - [`AuthProtocol::Ticket`] — HMAC-SHA256 challenge/response against a
//!   shared secret from the [`Keyring`], yielding a time-bounded session
//!   ticket and a set of [`RotatingSecrets`].

mod error;
mod handler;
mod keyring;
mod none;
mod ticket;

pub use error::AuthError;
pub use handler::{AuthClientHandler, AuthMethodList, AuthProtocol, AuthStatus, create_handler};
pub use keyring::{Keyring, RotatingSecret, RotatingSecrets, Secret, SharedRotating};
pub use ticket::{ServiceTicket, TicketAuth, TicketReply, TicketRequest, challenge_proof};
