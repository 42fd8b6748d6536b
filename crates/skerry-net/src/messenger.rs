//! The messenger seam.
//!
//! The session client does not own a transport. It talks through the
//! [`Messenger`] trait and receives traffic through the [`Dispatcher`]
//! trait it implements itself. A real implementation frames messages with
//! [`MonMessage::encode_frame`] onto its connections; tests use an
//! in-process mock that records sends and injects replies.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::message::MonMessage;

/// Identity and address of one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonInst {
    /// Monitor name within the map.
    pub name: String,
    /// Network address.
    pub addr: SocketAddr,
}

/// Handle to one logical connection.
///
/// Connection ids are unique per messenger, so holders can tell traffic
/// from a stale connection apart from the current one even after a
/// reconnect to the same peer.
pub struct Connection {
    /// Messenger-assigned unique id.
    pub id: u64,
    /// The peer this connection leads to.
    pub peer: MonInst,
}

impl Connection {
    /// True when both handles refer to the same logical connection.
    pub fn same(a: &Arc<Connection>, b: &Arc<Connection>) -> bool {
        a.id == b.id
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection(#{} -> {} {})", self.id, self.peer.name, self.peer.addr)
    }
}

/// Outbound capabilities of the transport.
///
/// Messages handed to [`send_message`](Messenger::send_message) for one
/// connection are delivered in call order for as long as the connection
/// lives. Sends never block the caller; transport failures surface as a
/// [`Dispatcher::handle_reset`] callback instead.
pub trait Messenger: Send + Sync {
    /// Get (or create) a connection to the given monitor.
    fn get_connection(&self, inst: &MonInst) -> Arc<Connection>;

    /// Queue a message on a connection.
    fn send_message(&self, msg: MonMessage, conn: &Arc<Connection>);

    /// Tear a connection down; no further traffic is delivered for it.
    fn mark_down(&self, conn: &Arc<Connection>);

    /// Send a transport-level keepalive.
    fn send_keepalive(&self, conn: &Arc<Connection>);

    /// Register the dispatcher that receives inbound traffic.
    fn add_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>);
}

/// Inbound callbacks from the transport.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    /// A message arrived on `conn`.
    async fn dispatch(&self, msg: MonMessage, conn: Arc<Connection>);

    /// The peer reset `conn`; no further messages will arrive on it.
    async fn handle_reset(&self, conn: Arc<Connection>);
}
