//! Monitor protocol messages.
//!
//! Each message is framed as a `u32` type code followed by the body,
//! encoded with the little-endian primitives from [`crate::wire`].

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use skerry_types::{EntityKind, EntityName};
use uuid::Uuid;

use crate::wire::{
    DecodeError, put_blob, put_string, put_uuid, take_blob, take_i32, take_string, take_u8,
    take_u32, take_u64, take_uuid, take_version,
};

/// Wire type codes for [`MonMessage`].
pub mod msg_type {
    /// Request the current monitor map.
    pub const MON_GET_MAP: u32 = 1;
    /// A serialized monitor map.
    pub const MON_MAP: u32 = 2;
    /// Authentication request.
    pub const AUTH: u32 = 3;
    /// Authentication reply.
    pub const AUTH_REPLY: u32 = 4;
    /// Subscription request carrying the whole topic map.
    pub const MON_SUBSCRIBE: u32 = 5;
    /// Subscription acknowledgement.
    pub const MON_SUBSCRIBE_ACK: u32 = 6;
    /// Map version query.
    pub const MON_GET_VERSION: u32 = 7;
    /// Map version reply.
    pub const MON_GET_VERSION_REPLY: u32 = 8;
    /// Cluster log entries from the client's log shipper.
    pub const LOG: u32 = 9;
    /// Acknowledgement of shipped log entries.
    pub const LOG_ACK: u32 = 10;
}

/// Result codes carried by [`MonMessage::AuthReply`].
pub mod auth_result {
    /// Handshake step accepted.
    pub const OK: i32 = 0;
    /// Credentials rejected.
    pub const DENIED: i32 = -1;
    /// None of the offered protocols are supported by the server.
    pub const NOT_SUPPORTED: i32 = -2;
}

/// One-time subscription: drop the topic after the first publication.
pub const SUBSCRIBE_ONETIME: u8 = 1;

/// A subscription to one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeItem {
    /// First version the client wants (0 = whatever is current).
    pub start: u64,
    /// Subscription flags ([`SUBSCRIBE_ONETIME`]).
    pub flags: u8,
}

/// Messages exchanged with a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonMessage {
    /// Ask the monitor for its current map. Empty body.
    GetMonMap,

    /// A serialized monitor map (decoded by the session client).
    MonMap {
        /// Encoded map, see the monmap codec.
        monmap: Bytes,
    },

    /// Authentication request.
    ///
    /// The first request of a session carries `protocol = 0` and the full
    /// set of supported protocol ids; follow-ups carry the negotiated
    /// protocol and an empty set.
    Auth {
        /// Active protocol id, 0 while negotiating.
        protocol: u32,
        /// Supported protocol ids, ascending.
        supported: Vec<u32>,
        /// Principal requesting the session.
        name: EntityName,
        /// Current global id (0 if none assigned yet).
        global_id: u64,
        /// Protocol-specific payload.
        payload: Bytes,
    },

    /// Authentication reply.
    AuthReply {
        /// Protocol the server selected.
        protocol: u32,
        /// Result code ([`auth_result`]).
        result: i32,
        /// Server-assigned global id (0 = unchanged).
        global_id: u64,
        /// Protocol-specific payload.
        payload: Bytes,
    },

    /// Subscription request carrying the entire topic map.
    Subscribe {
        /// Topic name to subscription parameters.
        what: BTreeMap<String, SubscribeItem>,
    },

    /// Subscription acknowledgement.
    SubscribeAck {
        /// Renewal interval granted by the monitor, in seconds.
        interval_secs: u32,
        /// Cluster fsid.
        fsid: Uuid,
    },

    /// Ask for the newest/oldest committed version of a named map.
    GetVersion {
        /// Which map ("osdmap", "monmap", ...).
        what: String,
        /// Caller-chosen handle echoed in the reply.
        handle: u64,
    },

    /// Reply to [`MonMessage::GetVersion`].
    GetVersionReply {
        /// Handle from the request.
        handle: u64,
        /// Newest committed version.
        version: u64,
        /// Oldest available version.
        oldest: u64,
    },

    /// Cluster log entries, opaque to the session layer.
    Log {
        /// Encoded log entries from the log shipper.
        entries: Bytes,
    },

    /// Acknowledgement of shipped log entries, opaque to the session layer.
    LogAck {
        /// Encoded acknowledgement for the log shipper.
        ack: Bytes,
    },
}

const STRUCT_V: u8 = 1;

impl MonMessage {
    /// Wire type code for this message.
    pub fn type_code(&self) -> u32 {
        match self {
            MonMessage::GetMonMap => msg_type::MON_GET_MAP,
            MonMessage::MonMap { .. } => msg_type::MON_MAP,
            MonMessage::Auth { .. } => msg_type::AUTH,
            MonMessage::AuthReply { .. } => msg_type::AUTH_REPLY,
            MonMessage::Subscribe { .. } => msg_type::MON_SUBSCRIBE,
            MonMessage::SubscribeAck { .. } => msg_type::MON_SUBSCRIBE_ACK,
            MonMessage::GetVersion { .. } => msg_type::MON_GET_VERSION,
            MonMessage::GetVersionReply { .. } => msg_type::MON_GET_VERSION_REPLY,
            MonMessage::Log { .. } => msg_type::LOG,
            MonMessage::LogAck { .. } => msg_type::LOG_ACK,
        }
    }

    /// Short name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            MonMessage::GetMonMap => "mon_get_map",
            MonMessage::MonMap { .. } => "mon_map",
            MonMessage::Auth { .. } => "auth",
            MonMessage::AuthReply { .. } => "auth_reply",
            MonMessage::Subscribe { .. } => "mon_subscribe",
            MonMessage::SubscribeAck { .. } => "mon_subscribe_ack",
            MonMessage::GetVersion { .. } => "mon_get_version",
            MonMessage::GetVersionReply { .. } => "mon_get_version_reply",
            MonMessage::Log { .. } => "log",
            MonMessage::LogAck { .. } => "log_ack",
        }
    }

    /// Encode a full frame: type code, then body.
    pub fn encode_frame(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.type_code());
        self.encode_body(&mut buf);
        buf.freeze()
    }

    /// Decode a full frame.
    pub fn decode_frame(mut buf: Bytes) -> Result<Self, DecodeError> {
        let code = take_u32(&mut buf)?;
        Self::decode_body(code, buf)
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            MonMessage::GetMonMap => {}

            MonMessage::MonMap { monmap } => put_blob(buf, monmap),

            MonMessage::Auth {
                protocol,
                supported,
                name,
                global_id,
                payload,
            } => {
                buf.put_u8(STRUCT_V);
                buf.put_u32_le(*protocol);
                buf.put_u32_le(supported.len() as u32);
                for proto in supported {
                    buf.put_u32_le(*proto);
                }
                put_entity_name(buf, name);
                buf.put_u64_le(*global_id);
                buf.put_slice(payload);
            }

            MonMessage::AuthReply {
                protocol,
                result,
                global_id,
                payload,
            } => {
                buf.put_u32_le(*protocol);
                buf.put_i32_le(*result);
                buf.put_u64_le(*global_id);
                buf.put_slice(payload);
            }

            MonMessage::Subscribe { what } => {
                buf.put_u32_le(what.len() as u32);
                for (topic, item) in what {
                    put_string(buf, topic);
                    buf.put_u64_le(item.start);
                    buf.put_u8(item.flags);
                }
            }

            MonMessage::SubscribeAck {
                interval_secs,
                fsid,
            } => {
                buf.put_u32_le(*interval_secs);
                put_uuid(buf, fsid);
            }

            MonMessage::GetVersion { what, handle } => {
                put_string(buf, what);
                buf.put_u64_le(*handle);
            }

            MonMessage::GetVersionReply {
                handle,
                version,
                oldest,
            } => {
                buf.put_u64_le(*handle);
                buf.put_u64_le(*version);
                buf.put_u64_le(*oldest);
            }

            MonMessage::Log { entries } => put_blob(buf, entries),

            MonMessage::LogAck { ack } => put_blob(buf, ack),
        }
    }

    fn decode_body(code: u32, mut buf: Bytes) -> Result<Self, DecodeError> {
        match code {
            msg_type::MON_GET_MAP => Ok(MonMessage::GetMonMap),

            msg_type::MON_MAP => Ok(MonMessage::MonMap {
                monmap: take_blob(&mut buf)?,
            }),

            msg_type::AUTH => {
                take_version(&mut buf, STRUCT_V)?;
                let protocol = take_u32(&mut buf)?;
                let count = take_u32(&mut buf)? as usize;
                let mut supported = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    supported.push(take_u32(&mut buf)?);
                }
                let name = take_entity_name(&mut buf)?;
                let global_id = take_u64(&mut buf)?;
                Ok(MonMessage::Auth {
                    protocol,
                    supported,
                    name,
                    global_id,
                    payload: buf,
                })
            }

            msg_type::AUTH_REPLY => {
                let protocol = take_u32(&mut buf)?;
                let result = take_i32(&mut buf)?;
                let global_id = take_u64(&mut buf)?;
                Ok(MonMessage::AuthReply {
                    protocol,
                    result,
                    global_id,
                    payload: buf,
                })
            }

            msg_type::MON_SUBSCRIBE => {
                let count = take_u32(&mut buf)? as usize;
                let mut what = BTreeMap::new();
                for _ in 0..count {
                    let topic = take_string(&mut buf)?;
                    let start = take_u64(&mut buf)?;
                    let flags = take_u8(&mut buf)?;
                    what.insert(topic, SubscribeItem { start, flags });
                }
                Ok(MonMessage::Subscribe { what })
            }

            msg_type::MON_SUBSCRIBE_ACK => Ok(MonMessage::SubscribeAck {
                interval_secs: take_u32(&mut buf)?,
                fsid: take_uuid(&mut buf)?,
            }),

            msg_type::MON_GET_VERSION => Ok(MonMessage::GetVersion {
                what: take_string(&mut buf)?,
                handle: take_u64(&mut buf)?,
            }),

            msg_type::MON_GET_VERSION_REPLY => Ok(MonMessage::GetVersionReply {
                handle: take_u64(&mut buf)?,
                version: take_u64(&mut buf)?,
                oldest: take_u64(&mut buf)?,
            }),

            msg_type::LOG => Ok(MonMessage::Log {
                entries: take_blob(&mut buf)?,
            }),

            msg_type::LOG_ACK => Ok(MonMessage::LogAck {
                ack: take_blob(&mut buf)?,
            }),

            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

fn put_entity_name(buf: &mut BytesMut, name: &EntityName) {
    buf.put_u32_le(name.kind.code());
    put_string(buf, &name.id);
}

fn take_entity_name(buf: &mut Bytes) -> Result<EntityName, DecodeError> {
    let code = take_u32(buf)?;
    let kind = EntityKind::from_code(code)
        .ok_or_else(|| DecodeError::BadValue(format!("entity kind {code}")))?;
    let id = take_string(buf)?;
    Ok(EntityName { kind, id })
}
