//! Data model shared by every crate in the routing fabric: endpoint and
//! route identifiers, registration options, and the coordination-service
//! session value.

use std::fmt;

use base64::Engine;
use fab_path::CoordinationPath;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EndpointAddress
// ---------------------------------------------------------------------------

/// Opaque logical-endpoint identifier. Equality is byte equality; the
/// empty value is the reserved "unknown" sentinel (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointAddress(Vec<u8>);

impl EndpointAddress {
    /// The reserved "unknown" endpoint value.
    pub fn unknown() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl From<&str> for EndpointAddress {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for EndpointAddress {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// A route tag. No structural interpretation; equality is byte equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route(String);

impl Route {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Route {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Route {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RouteRegistrationOptions
// ---------------------------------------------------------------------------

/// Flag set recognized by a route registration (spec.md §3).
///
/// Hand-rolled rather than pulling in `bitflags` for two booleans, matching
/// how the teacher's own small state enums (`services/server/src/state.rs`)
/// are hand-written rather than reached for a flags crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteRegistrationOptions {
    /// Session-scoped; removed when the owning session dies.
    pub transient: bool,
    /// Target receives only publish traffic, never point-to-point.
    pub publish_only: bool,
}

impl RouteRegistrationOptions {
    /// Persistent, both-modes (the spec's `Default`).
    pub const DEFAULT: Self = Self {
        transient: false,
        publish_only: false,
    };

    #[must_use]
    pub fn transient() -> Self {
        Self {
            transient: true,
            ..Self::DEFAULT
        }
    }

    #[must_use]
    pub fn publish_only() -> Self {
        Self {
            publish_only: true,
            ..Self::DEFAULT
        }
    }

    /// Encode as the wire `options: int32` used by §6.5 and the forward
    /// registry entry value.
    #[must_use]
    pub fn to_wire(self) -> i32 {
        let mut bits = 0i32;
        if self.transient {
            bits |= 0b01;
        }
        if self.publish_only {
            bits |= 0b10;
        }
        bits
    }

    #[must_use]
    pub fn from_wire(bits: i32) -> Self {
        Self {
            transient: bits & 0b01 != 0,
            publish_only: bits & 0b10 != 0,
        }
    }
}

// ---------------------------------------------------------------------------
// RouteTarget
// ---------------------------------------------------------------------------

/// A `(endpoint, options)` pair. Set semantics are keyed by `endpoint`
/// only (spec.md §3): two targets with the same endpoint but different
/// options compare equal and hash identically.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub endpoint: EndpointAddress,
    pub options: RouteRegistrationOptions,
}

impl PartialEq for RouteTarget {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for RouteTarget {}

impl std::hash::Hash for RouteTarget {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A coordination-service session identity: an opaque prefix plus the
/// node's physical address, serialized as
/// `len(prefix) ‖ prefix ‖ physical_address` and stringified with base64
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    pub prefix: Vec<u8>,
    pub physical_address: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionDecodeError {
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("truncated session value")]
    Truncated,
    #[error("prefix length prefix exceeds payload")]
    BadLength,
}

impl Session {
    #[must_use]
    pub fn new(prefix: Vec<u8>, physical_address: Vec<u8>) -> Self {
        Self {
            prefix,
            physical_address,
        }
    }

    /// `len(prefix) ‖ prefix ‖ physical_address`, with `len` as a 4-byte
    /// big-endian count of bytes in `prefix`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.prefix.len() + self.physical_address.len());
        buf.extend_from_slice(&(self.prefix.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(&self.physical_address);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SessionDecodeError> {
        if bytes.len() < 4 {
            return Err(SessionDecodeError::Truncated);
        }
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let rest = &bytes[4..];
        if len > rest.len() {
            return Err(SessionDecodeError::BadLength);
        }
        let (prefix, physical_address) = rest.split_at(len);
        Ok(Self {
            prefix: prefix.to_vec(),
            physical_address: physical_address.to_vec(),
        })
    }

    /// Stringify via base64 (the form used as the final `<session>` path
    /// segment in §6.4).
    #[must_use]
    pub fn to_token(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.encode())
    }

    pub fn from_token(token: &str) -> Result<Self, SessionDecodeError> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| SessionDecodeError::Base64(e.to_string()))?;
        Self::decode(&bytes)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

// ---------------------------------------------------------------------------
// Coordination path layout (§6.4, bit-exact)
// ---------------------------------------------------------------------------

/// `fab_path::CoordinationPath` specialized with the layouts fixed by
/// spec.md §6.4. Each constructor below produces exactly one row of that
/// table.
pub mod layout {
    use super::{CoordinationPath, EndpointAddress, Route, Session};

    /// `/maps/<endpoint>/<session>`
    #[must_use]
    pub fn endpoint_map_entry(endpoint: &EndpointAddress, session: &Session) -> CoordinationPath {
        CoordinationPath::root()
            .child("maps")
            .child(endpoint.as_str())
            .child(&session.to_token())
    }

    /// `/maps/<endpoint>`
    #[must_use]
    pub fn endpoint_map_root(endpoint: &EndpointAddress) -> CoordinationPath {
        CoordinationPath::root().child("maps").child(endpoint.as_str())
    }

    /// `/routes/<route>/<id = hash(endpoint,session)>`
    #[must_use]
    pub fn route_forward_entry(
        route: &Route,
        endpoint: &EndpointAddress,
        session: &Session,
    ) -> CoordinationPath {
        CoordinationPath::root()
            .child("routes")
            .child(route.as_str())
            .child(&content_hash(endpoint, session))
    }

    /// `/routes/<route>`
    #[must_use]
    pub fn route_forward_root(route: &Route) -> CoordinationPath {
        CoordinationPath::root().child("routes").child(route.as_str())
    }

    /// `/reverse-routes/<session>/<endpoint>/<route>`
    #[must_use]
    pub fn route_reverse_entry(
        session: &Session,
        endpoint: &EndpointAddress,
        route: &Route,
    ) -> CoordinationPath {
        CoordinationPath::root()
            .child("reverse-routes")
            .child(&session.to_token())
            .child(endpoint.as_str())
            .child(route.as_str())
    }

    /// `/reverse-routes/<session>/<endpoint>`
    #[must_use]
    pub fn route_reverse_endpoint_root(
        session: &Session,
        endpoint: &EndpointAddress,
    ) -> CoordinationPath {
        CoordinationPath::root()
            .child("reverse-routes")
            .child(&session.to_token())
            .child(endpoint.as_str())
    }

    /// Deterministic content-address for a forward route entry id, derived
    /// from `(endpoint, session)` so `AddRoute` is safe to retry (spec.md
    /// §4.4 Failure semantics).
    #[must_use]
    pub fn content_hash(endpoint: &EndpointAddress, session: &Session) -> String {
        fnv1a_hex(&[endpoint.as_bytes(), session.to_token().as_bytes()])
    }

    fn fnv1a_hex(parts: &[&[u8]]) -> String {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for part in parts {
            for &b in *part {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
            }
            // Separator byte so ("ab","c") and ("a","bc") never collide.
            hash ^= 0xFF;
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
        }
        format!("{hash:016x}")
    }
}
