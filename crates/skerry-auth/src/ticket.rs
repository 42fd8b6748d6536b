//! The `ticket` protocol: HMAC-SHA256 challenge/response.
//!
//! Handshake, driven by the session client:
//!
//! 1. The server answers the protocol negotiation with a
//!    [`TicketReply::Challenge`].
//! 2. The client answers with a [`TicketRequest::Proof`]: a fresh client
//!    challenge plus `HMAC(secret, server_challenge || client_challenge)`.
//! 3. The server answers with a [`TicketReply::Ticket`]: its own proof
//!    over `client_challenge + 1`, a time-bounded session ticket, and the
//!    current rotating service keys.
//!
//! Renewals reuse the same shapes authenticated with the session key:
//! [`TicketRequest::Ticket`] refreshes the session ticket,
//! [`TicketRequest::Rotating`] refreshes rotating keys only.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use sha2::Sha256;
use skerry_net::wire::{DecodeError, take_u8, take_u32, take_u64, take_version};
use skerry_types::EntityName;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::AuthError;
use crate::handler::{AuthClientHandler, AuthProtocol, AuthStatus};
use crate::keyring::{Keyring, RotatingSecret, Secret, SharedRotating};

/// Renew the session ticket when it is this close to expiry.
const TICKET_RENEW_BEFORE: Duration = Duration::from_secs(30);

const PAYLOAD_V: u8 = 1;

const REQ_PROOF: u8 = 1;
const REQ_TICKET: u8 = 2;
const REQ_ROTATING: u8 = 3;

const REP_CHALLENGE: u8 = 1;
const REP_TICKET: u8 = 2;
const REP_ROTATING: u8 = 3;

/// Compute the challenge proof: `HMAC-SHA256(key, le(a) || le(b))`.
pub fn challenge_proof(secret: &Secret, a: u64, b: u64) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(&a.to_le_bytes());
    mac.update(&b.to_le_bytes());
    mac.finalize().into_bytes().into()
}

/// A time-bounded session ticket issued by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTicket {
    /// Session key for renewals.
    pub key: Secret,
    /// When the ticket stops being valid.
    pub expires: SystemTime,
}

/// Client-to-server payloads of the ticket protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketRequest {
    /// Answer to the server challenge, proving knowledge of the
    /// principal's secret.
    Proof {
        /// Fresh client challenge.
        client_challenge: u64,
        /// `HMAC(secret, server_challenge || client_challenge)`.
        proof: [u8; 32],
        /// Service key classes the principal wants delivered.
        want_keys: u32,
    },
    /// Session ticket renewal, authenticated with the session key.
    Ticket {
        /// Fresh client challenge.
        client_challenge: u64,
        /// `HMAC(session_key, client_challenge || 0)`.
        proof: [u8; 32],
    },
    /// Rotating-key refresh under an established session.
    Rotating,
}

/// Server-to-client payloads of the ticket protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketReply {
    /// Opening challenge.
    Challenge {
        /// Server-chosen nonce the client must prove against.
        server_challenge: u64,
    },
    /// Ticket issue (initial or renewal).
    Ticket {
        /// `HMAC(secret, (client_challenge + 1) || 0)`, over the secret
        /// that authenticated the request.
        server_proof: [u8; 32],
        /// The issued session ticket.
        ticket: ServiceTicket,
        /// Current rotating service keys (may be empty for clients).
        rotating: Vec<RotatingSecret>,
    },
    /// Rotating keys only.
    Rotating {
        /// Current rotating service keys.
        rotating: Vec<RotatingSecret>,
    },
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn time_from_epoch(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn take_key(buf: &mut Bytes) -> Result<[u8; 32], DecodeError> {
    if buf.len() < 32 {
        return Err(DecodeError::Truncated {
            need: 32,
            have: buf.len(),
        });
    }
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&buf.split_to(32));
    Ok(raw)
}

fn put_rotating(buf: &mut BytesMut, rotating: &[RotatingSecret]) {
    buf.put_u32_le(rotating.len() as u32);
    for secret in rotating {
        buf.put_u64_le(secret.id);
        buf.put_slice(secret.key.as_bytes());
        buf.put_u64_le(epoch_secs(secret.expires));
    }
}

fn take_rotating(buf: &mut Bytes) -> Result<Vec<RotatingSecret>, DecodeError> {
    let count = take_u32(buf)? as usize;
    let mut rotating = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let id = take_u64(buf)?;
        let key = Secret::from_bytes(take_key(buf)?);
        let expires = time_from_epoch(take_u64(buf)?);
        rotating.push(RotatingSecret { id, key, expires });
    }
    Ok(rotating)
}

impl TicketRequest {
    /// Encode to a wire payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(PAYLOAD_V);
        match self {
            TicketRequest::Proof {
                client_challenge,
                proof,
                want_keys,
            } => {
                buf.put_u8(REQ_PROOF);
                buf.put_u64_le(*client_challenge);
                buf.put_slice(proof);
                buf.put_u32_le(*want_keys);
            }
            TicketRequest::Ticket {
                client_challenge,
                proof,
            } => {
                buf.put_u8(REQ_TICKET);
                buf.put_u64_le(*client_challenge);
                buf.put_slice(proof);
            }
            TicketRequest::Rotating => buf.put_u8(REQ_ROTATING),
        }
        buf.freeze()
    }

    /// Decode a wire payload.
    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        take_version(&mut buf, PAYLOAD_V)?;
        match take_u8(&mut buf)? {
            REQ_PROOF => Ok(TicketRequest::Proof {
                client_challenge: take_u64(&mut buf)?,
                proof: take_key(&mut buf)?,
                want_keys: take_u32(&mut buf)?,
            }),
            REQ_TICKET => Ok(TicketRequest::Ticket {
                client_challenge: take_u64(&mut buf)?,
                proof: take_key(&mut buf)?,
            }),
            REQ_ROTATING => Ok(TicketRequest::Rotating),
            other => Err(DecodeError::BadValue(format!("ticket request type {other}"))),
        }
    }
}

impl TicketReply {
    /// Encode to a wire payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(PAYLOAD_V);
        match self {
            TicketReply::Challenge { server_challenge } => {
                buf.put_u8(REP_CHALLENGE);
                buf.put_u64_le(*server_challenge);
            }
            TicketReply::Ticket {
                server_proof,
                ticket,
                rotating,
            } => {
                buf.put_u8(REP_TICKET);
                buf.put_slice(server_proof);
                buf.put_slice(ticket.key.as_bytes());
                buf.put_u64_le(epoch_secs(ticket.expires));
                put_rotating(&mut buf, rotating);
            }
            TicketReply::Rotating { rotating } => {
                buf.put_u8(REP_ROTATING);
                put_rotating(&mut buf, rotating);
            }
        }
        buf.freeze()
    }

    /// Decode a wire payload.
    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        take_version(&mut buf, PAYLOAD_V)?;
        match take_u8(&mut buf)? {
            REP_CHALLENGE => Ok(TicketReply::Challenge {
                server_challenge: take_u64(&mut buf)?,
            }),
            REP_TICKET => Ok(TicketReply::Ticket {
                server_proof: take_key(&mut buf)?,
                ticket: ServiceTicket {
                    key: Secret::from_bytes(take_key(&mut buf)?),
                    expires: time_from_epoch(take_u64(&mut buf)?),
                },
                rotating: take_rotating(&mut buf)?,
            }),
            REP_ROTATING => Ok(TicketReply::Rotating {
                rotating: take_rotating(&mut buf)?,
            }),
            other => Err(DecodeError::BadValue(format!("ticket reply type {other}"))),
        }
    }
}

/// Handler for [`AuthProtocol::Ticket`].
pub struct TicketAuth {
    name: Option<EntityName>,
    keyring: Arc<Keyring>,
    rotating: SharedRotating,
    want_keys: u32,
    global_id: u64,
    server_challenge: Option<u64>,
    /// Challenge and secret of the request in flight, kept to verify the
    /// server's answering proof.
    pending: Option<(u64, Secret)>,
    session: Option<ServiceTicket>,
    rng: SmallRng,
}

impl TicketAuth {
    /// Create a handler bound to a keyring and the shared rotating set.
    pub fn new(keyring: Arc<Keyring>, rotating: SharedRotating) -> Self {
        Self {
            name: None,
            keyring,
            rotating,
            want_keys: 0,
            global_id: 0,
            server_challenge: None,
            pending: None,
            session: None,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// The current session ticket, if the handshake has completed.
    pub fn session(&self) -> Option<&ServiceTicket> {
        self.session.as_ref()
    }

    fn install_rotating(&self, secrets: Vec<RotatingSecret>) {
        if secrets.is_empty() {
            return;
        }
        let mut rotating = self.rotating.lock().expect("rotating lock poisoned");
        for secret in secrets {
            rotating.insert(secret);
        }
        rotating.prune_expired(SystemTime::now());
    }
}

impl AuthClientHandler for TicketAuth {
    fn protocol(&self) -> AuthProtocol {
        AuthProtocol::Ticket
    }

    fn init(&mut self, name: &EntityName) {
        self.name = Some(name.clone());
    }

    fn build_request(&mut self) -> Result<Bytes, AuthError> {
        let name = self.name.clone().ok_or(AuthError::NotInitialized)?;

        // Under an established session, a request is a ticket renewal
        // authenticated with the session key.
        if let Some(session) = &self.session {
            let client_challenge: u64 = self.rng.random();
            let proof = challenge_proof(&session.key, client_challenge, 0);
            self.pending = Some((client_challenge, session.key));
            return Ok(TicketRequest::Ticket {
                client_challenge,
                proof,
            }
            .encode());
        }

        let server_challenge = self.server_challenge.ok_or(AuthError::NoChallenge)?;
        let secret = self
            .keyring
            .get(&name)
            .ok_or(AuthError::MissingKey(name))?;
        let client_challenge: u64 = self.rng.random();
        let proof = challenge_proof(&secret, server_challenge, client_challenge);
        self.pending = Some((client_challenge, secret));
        Ok(TicketRequest::Proof {
            client_challenge,
            proof,
            want_keys: self.want_keys,
        }
        .encode())
    }

    fn handle_response(&mut self, result: i32, payload: Bytes) -> Result<AuthStatus, AuthError> {
        if result < 0 {
            return Err(AuthError::Denied(result));
        }

        match TicketReply::decode(payload)? {
            TicketReply::Challenge { server_challenge } => {
                debug!(server_challenge, "got server challenge");
                self.server_challenge = Some(server_challenge);
                Ok(AuthStatus::Again)
            }

            TicketReply::Ticket {
                server_proof,
                ticket,
                rotating,
            } => {
                let (client_challenge, secret) =
                    self.pending.take().ok_or(AuthError::NoChallenge)?;
                let expected = challenge_proof(&secret, client_challenge.wrapping_add(1), 0);
                if !bool::from(server_proof.ct_eq(&expected)) {
                    return Err(AuthError::BadServerProof);
                }
                debug!(
                    global_id = self.global_id,
                    expires = ?ticket.expires,
                    "session ticket issued"
                );
                self.session = Some(ticket);
                self.install_rotating(rotating);
                Ok(AuthStatus::Done)
            }

            TicketReply::Rotating { rotating } => {
                debug!(count = rotating.len(), "rotating keys refreshed");
                self.install_rotating(rotating);
                Ok(AuthStatus::Done)
            }
        }
    }

    fn need_tickets(&self) -> bool {
        match &self.session {
            None => false,
            Some(ticket) => SystemTime::now() + TICKET_RENEW_BEFORE >= ticket.expires,
        }
    }

    fn set_want_keys(&mut self, want: u32) {
        self.want_keys = want;
    }

    fn set_global_id(&mut self, global_id: u64) {
        self.global_id = global_id;
    }

    fn reset(&mut self) {
        self.server_challenge = None;
        self.pending = None;
        self.session = None;
    }

    fn tick(&mut self) {
        self.rotating
            .lock()
            .expect("rotating lock poisoned")
            .prune_expired(SystemTime::now());
    }

    fn build_rotating_request(&self) -> Option<Bytes> {
        self.session
            .as_ref()
            .map(|_| TicketRequest::Rotating.encode())
    }
}
