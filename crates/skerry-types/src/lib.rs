//! Shared types and identifiers for the skerry client core.
//!
//! This crate defines the value types used across the skerry workspace:
//! file and snapshot identifiers ([`Ino`], [`SnapId`], [`SnapContext`]),
//! object addressing ([`ObjectId`], [`ObjectLocator`]), the striping
//! [`Layout`], and principal naming ([`EntityName`], [`EntityKind`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// File / snapshot identifiers
// ---------------------------------------------------------------------------

/// Inode number identifying a striped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Ino(pub u64);

impl fmt::Display for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Snapshot id used as a read-consistency token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SnapId(pub u64);

impl SnapId {
    /// The "head" (unsnapped) view of an object.
    pub const HEAD: SnapId = SnapId(u64::MAX - 2);

    /// True when this id addresses the unsnapped head.
    pub fn is_head(&self) -> bool {
        *self == Self::HEAD
    }
}

impl fmt::Display for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_head() {
            write!(f, "head")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Write-time snapshot vector: the most recent snapshot sequence and the
/// set of snapshots the write must preserve, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapContext {
    /// Most recent snapshot sequence number.
    pub seq: u64,
    /// Existing snapshot ids, descending.
    pub snaps: Vec<u64>,
}

impl SnapContext {
    /// A snap context is valid when `seq` covers every listed snapshot
    /// and the snapshot list is strictly descending.
    pub fn is_valid(&self) -> bool {
        if let Some(&first) = self.snaps.first()
            && self.seq < first
        {
            return false;
        }
        self.snaps.windows(2).all(|w| w[0] > w[1])
    }
}

// ---------------------------------------------------------------------------
// Object addressing
// ---------------------------------------------------------------------------

/// Opaque unique object name, derived from `(ino, objectno)`.
///
/// The textual form is `<ino hex>.<objectno as 8+ hex digits>`, so all
/// objects of one file share a common prefix and sort in stripe order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// Build the object name for block `objectno` of file `ino`.
    pub fn new(ino: Ino, objectno: u64) -> Self {
        Self(format!("{:x}.{objectno:08x}", ino.0))
    }

    /// Return the object name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing tuple used by the object service to place an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocator {
    /// Target pool id.
    pub pool: i64,
}

// ---------------------------------------------------------------------------
// Striping layout
// ---------------------------------------------------------------------------

/// Striping parameters for a file.
///
/// A file is cut into `stripe_unit`-sized blocks dealt round-robin across a
/// set of `stripe_count` objects; each object holds
/// `object_size / stripe_unit` stripe units before the mapping moves on to
/// the next object set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Bytes per contiguous run within one object.
    pub stripe_unit: u32,
    /// Number of objects in a stripe set.
    pub stripe_count: u32,
    /// Bytes per object. Must be a multiple of `stripe_unit`.
    pub object_size: u32,
    /// Pool the file's objects are placed in.
    pub pool: i64,
}

impl Layout {
    /// Check the layout invariants: all parameters nonzero and
    /// `object_size` a multiple of `stripe_unit`.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.stripe_unit == 0 || self.stripe_count == 0 || self.object_size == 0 {
            return Err(LayoutError::Zero);
        }
        if self.object_size % self.stripe_unit != 0 {
            return Err(LayoutError::Unaligned {
                object_size: self.object_size,
                stripe_unit: self.stripe_unit,
            });
        }
        Ok(())
    }

    /// Stripe units held by one object.
    pub fn stripes_per_object(&self) -> u64 {
        u64::from(self.object_size) / u64::from(self.stripe_unit)
    }

    /// File-offset cycle after which the object mapping repeats:
    /// `stripe_count * object_size`.
    pub fn period(&self) -> u64 {
        u64::from(self.stripe_count) * u64::from(self.object_size)
    }

    /// Locator for this file's objects.
    pub fn object_locator(&self) -> ObjectLocator {
        ObjectLocator { pool: self.pool }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            stripe_unit: 4 << 20,
            stripe_count: 1,
            object_size: 4 << 20,
            pool: 0,
        }
    }
}

/// Invalid striping layout.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LayoutError {
    /// A layout parameter is zero.
    #[error("layout parameters must be nonzero")]
    Zero,

    /// `object_size` is not a multiple of `stripe_unit`.
    #[error("object_size {object_size} is not a multiple of stripe_unit {stripe_unit}")]
    Unaligned {
        /// Configured object size.
        object_size: u32,
        /// Configured stripe unit.
        stripe_unit: u32,
    },
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

/// Kind of authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// An ordinary client.
    Client,
    /// An object storage daemon.
    Osd,
    /// A metadata server.
    Mds,
    /// A monitor.
    Mon,
}

impl EntityKind {
    /// Wire code for this kind.
    pub fn code(&self) -> u32 {
        match self {
            EntityKind::Client => 0,
            EntityKind::Osd => 1,
            EntityKind::Mds => 2,
            EntityKind::Mon => 3,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(EntityKind::Client),
            1 => Some(EntityKind::Osd),
            2 => Some(EntityKind::Mds),
            3 => Some(EntityKind::Mon),
            _ => None,
        }
    }

    /// Daemon principals hold rotating service keys; plain clients don't.
    pub fn needs_rotating_keys(&self) -> bool {
        matches!(self, EntityKind::Osd | EntityKind::Mds | EntityKind::Mon)
    }

    fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Client => "client",
            EntityKind::Osd => "osd",
            EntityKind::Mds => "mds",
            EntityKind::Mon => "mon",
        }
    }
}

/// Name of an authenticated principal, e.g. `client.admin` or `osd.3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityName {
    /// Principal kind.
    pub kind: EntityKind,
    /// Identifier within the kind.
    pub id: String,
}

impl EntityName {
    /// Build a client principal name.
    pub fn client(id: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Client,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.prefix(), self.id)
    }
}

impl FromStr for EntityName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, id) = s
            .split_once('.')
            .ok_or_else(|| format!("entity name {s:?} has no type prefix"))?;
        let kind = match prefix {
            "client" => EntityKind::Client,
            "osd" => EntityKind::Osd,
            "mds" => EntityKind::Mds,
            "mon" => EntityKind::Mon,
            other => return Err(format!("unknown entity type {other:?}")),
        };
        Ok(Self {
            kind,
            id: id.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Object op flags
// ---------------------------------------------------------------------------

/// Flags accepted by object-service operations.
pub mod osd_flags {
    /// Order the op with respect to concurrent reads and writes.
    pub const RWORDERED: u32 = 1 << 0;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(stripe_unit: u32, stripe_count: u32, object_size: u32) -> Layout {
        Layout {
            stripe_unit,
            stripe_count,
            object_size,
            pool: 0,
        }
    }

    #[test]
    fn test_layout_validate_ok() {
        assert!(layout(4096, 4, 16384).validate().is_ok());
        assert!(layout(64, 2, 128).validate().is_ok());
        assert!(layout(64, 1, 64).validate().is_ok());
    }

    #[test]
    fn test_layout_validate_rejects_zero() {
        assert!(matches!(
            layout(0, 4, 16384).validate(),
            Err(LayoutError::Zero)
        ));
        assert!(matches!(
            layout(4096, 0, 16384).validate(),
            Err(LayoutError::Zero)
        ));
        assert!(matches!(
            layout(4096, 4, 0).validate(),
            Err(LayoutError::Zero)
        ));
    }

    #[test]
    fn test_layout_validate_rejects_unaligned() {
        let err = layout(4096, 4, 10000).validate().unwrap_err();
        assert!(matches!(err, LayoutError::Unaligned { .. }));
    }

    #[test]
    fn test_layout_derived_quantities() {
        let l = layout(4096, 4, 16384);
        assert_eq!(l.stripes_per_object(), 4);
        assert_eq!(l.period(), 65536);

        let l = layout(64, 2, 128);
        assert_eq!(l.stripes_per_object(), 2);
        assert_eq!(l.period(), 256);
    }

    #[test]
    fn test_object_id_format() {
        let oid = ObjectId::new(Ino(0x1234), 7);
        assert_eq!(oid.as_str(), "1234.00000007");
        assert_eq!(oid.to_string(), "1234.00000007");
    }

    #[test]
    fn test_object_id_sorts_in_stripe_order() {
        let a = ObjectId::new(Ino(1), 1);
        let b = ObjectId::new(Ino(1), 2);
        let c = ObjectId::new(Ino(1), 10);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_entity_name_display_and_parse() {
        let name = EntityName::client("admin");
        assert_eq!(name.to_string(), "client.admin");
        assert_eq!("client.admin".parse::<EntityName>().unwrap(), name);

        let osd: EntityName = "osd.3".parse().unwrap();
        assert_eq!(osd.kind, EntityKind::Osd);
        assert_eq!(osd.id, "3");
    }

    #[test]
    fn test_entity_name_parse_rejects_garbage() {
        assert!("admin".parse::<EntityName>().is_err());
        assert!("goat.1".parse::<EntityName>().is_err());
    }

    #[test]
    fn test_rotating_key_principals() {
        assert!(!EntityKind::Client.needs_rotating_keys());
        assert!(EntityKind::Osd.needs_rotating_keys());
        assert!(EntityKind::Mds.needs_rotating_keys());
        assert!(EntityKind::Mon.needs_rotating_keys());
    }

    #[test]
    fn test_entity_kind_codes_roundtrip() {
        for kind in [
            EntityKind::Client,
            EntityKind::Osd,
            EntityKind::Mds,
            EntityKind::Mon,
        ] {
            assert_eq!(EntityKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(EntityKind::from_code(99), None);
    }

    #[test]
    fn test_snap_context_validity() {
        assert!(SnapContext::default().is_valid());
        assert!(
            SnapContext {
                seq: 5,
                snaps: vec![5, 3, 1]
            }
            .is_valid()
        );
        // seq behind the newest snap
        assert!(
            !SnapContext {
                seq: 2,
                snaps: vec![5]
            }
            .is_valid()
        );
        // not strictly descending
        assert!(
            !SnapContext {
                seq: 5,
                snaps: vec![3, 3]
            }
            .is_valid()
        );
    }

    #[test]
    fn test_snap_id_head() {
        assert!(SnapId::HEAD.is_head());
        assert!(!SnapId(1).is_head());
        assert_eq!(SnapId::HEAD.to_string(), "head");
    }
}
