//! Monitor wire protocol and messenger seam.
//!
//! This crate holds everything the session client needs to talk to a
//! monitor without owning a transport:
//!
//! - [`wire`] — bit-exact little-endian encode/decode helpers.
//! - [`MonMessage`] — the monitor protocol messages and their frame codec.
//! - [`Messenger`] / [`Dispatcher`] — the trait seam to the real transport,
//!   so tests can substitute an in-process mock.

pub mod wire;

mod message;
mod messenger;

pub use message::{MonMessage, SUBSCRIBE_ONETIME, SubscribeItem, auth_result, msg_type};
pub use messenger::{Connection, Dispatcher, Messenger, MonInst};
pub use wire::DecodeError;
