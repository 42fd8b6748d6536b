//! The monitor map: roster, ranks, and cluster identity.

use std::fmt;
use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use skerry_net::MonInst;
use skerry_net::wire::{
    DecodeError, put_string, put_uuid, take_string, take_u32, take_u64, take_uuid, take_version,
};
use uuid::Uuid;

use crate::error::MonError;

const STRUCT_V: u8 = 1;

/// Immutable snapshot of the monitor roster.
///
/// A monitor's rank is its position in the defined ordering; names are
/// unique. The map is replaced wholesale when a newer epoch arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonMap {
    /// Map epoch; 0 for a bootstrap map built from configuration.
    pub epoch: u64,
    /// Cluster identity; nil until a real map has been received.
    pub fsid: Uuid,
    entries: Vec<(String, SocketAddr)>,
}

impl MonMap {
    /// An empty map (no monitors, nil fsid).
    pub fn empty() -> Self {
        Self {
            epoch: 0,
            fsid: Uuid::nil(),
            entries: Vec::new(),
        }
    }

    /// Bootstrap a map from configured `"name=host:port"` entries.
    ///
    /// Bare `host:port` entries get generated names so they can still be
    /// addressed by rank.
    pub fn build_initial(mon_hosts: &[String]) -> Result<Self, MonError> {
        let mut entries = Vec::with_capacity(mon_hosts.len());
        for (i, host) in mon_hosts.iter().enumerate() {
            let (name, addr) = match host.split_once('=') {
                Some((name, addr)) => (name.to_string(), addr),
                None => (format!("noname-{i}"), host.as_str()),
            };
            let addr: SocketAddr = addr
                .trim()
                .parse()
                .map_err(|_| MonError::BadMonHost(host.clone()))?;
            if entries.iter().any(|(n, _)| *n == name) {
                return Err(MonError::BadMonHost(host.clone()));
            }
            entries.push((name, addr));
        }
        Ok(Self {
            epoch: 0,
            fsid: Uuid::nil(),
            entries,
        })
    }

    /// Number of monitors.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Monitor name at `rank`.
    pub fn name_by_rank(&self, rank: usize) -> Option<&str> {
        self.entries.get(rank).map(|(name, _)| name.as_str())
    }

    /// Rank of a named monitor.
    pub fn rank_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    /// Identity and address of a named monitor.
    pub fn inst_by_name(&self, name: &str) -> Option<MonInst> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, addr)| MonInst {
                name: n.clone(),
                addr: *addr,
            })
    }

    /// Name of the monitor listening on `addr`.
    pub fn addr_to_name(&self, addr: SocketAddr) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, a)| *a == addr)
            .map(|(n, _)| n.as_str())
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(STRUCT_V);
        put_uuid(&mut buf, &self.fsid);
        buf.put_u64_le(self.epoch);
        buf.put_u32_le(self.entries.len() as u32);
        for (name, addr) in &self.entries {
            put_string(&mut buf, name);
            put_string(&mut buf, &addr.to_string());
        }
        buf.freeze()
    }

    /// Decode from the wire.
    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        take_version(&mut buf, STRUCT_V)?;
        let fsid = take_uuid(&mut buf)?;
        let epoch = take_u64(&mut buf)?;
        let count = take_u32(&mut buf)? as usize;
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let name = take_string(&mut buf)?;
            let addr: SocketAddr = take_string(&mut buf)?
                .parse()
                .map_err(|e| DecodeError::BadValue(format!("monitor address: {e}")))?;
            if entries.iter().any(|(n, _): &(String, _)| *n == name) {
                return Err(DecodeError::BadValue(format!(
                    "duplicate monitor name {name:?}"
                )));
            }
            entries.push((name, addr));
        }
        Ok(Self {
            epoch,
            fsid,
            entries,
        })
    }
}

impl fmt::Display for MonMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "epoch {} fsid {}", self.epoch, self.fsid)?;
        for (rank, (name, addr)) in self.entries.iter().enumerate() {
            writeln!(f, "{rank}: mon.{name} {addr}")?;
        }
        Ok(())
    }
}
