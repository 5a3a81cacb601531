//! The typed entry model: scalars, container payloads, and expiration.
//!
//! Every key slot holds one [`Entry`]: a payload tagged with its container
//! [`Kind`] plus an optional absolute expiration instant. The kind of a slot
//! is fixed for its lifetime; changing it requires deleting (or expiring)
//! the key and recreating it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Instant;

use bytes::Bytes;

/// The container category of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    String,
    List,
    Hash,
    Set,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::String => write!(f, "string"),
            Kind::List => write!(f, "list"),
            Kind::Hash => write!(f, "hash"),
            Kind::Set => write!(f, "set"),
        }
    }
}

/// An opaque scalar value.
///
/// Counter operations pattern-match for [`Scalar::Int`]; every other shape
/// rejects them with `InvalidValueType`. `Other` carries a caller-serialized
/// form for values outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Bytes),
    Other(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Str(s) => write!(f, "{}", s),
            Scalar::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Scalar::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<Bytes> for Scalar {
    fn from(value: Bytes) -> Self {
        Scalar::Bytes(value)
    }
}

/// The data carried by an entry: a scalar or one of the container shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Scalar(Scalar),
    List(VecDeque<Scalar>),
    Hash(HashMap<String, Scalar>),
    Set(HashSet<Scalar>),
}

impl Payload {
    /// The container category of this payload.
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Scalar(_) => Kind::String,
            Payload::List(_) => Kind::List,
            Payload::Hash(_) => Kind::Hash,
            Payload::Set(_) => Kind::Set,
        }
    }

    /// The scalar inside a string payload, if this is one.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Payload::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Consumes the payload, yielding the scalar if this is a string.
    pub fn into_scalar(self) -> Option<Scalar> {
        match self {
            Payload::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Scalar(s) => write!(f, "{}", s),
            Payload::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Payload::Hash(fields) => {
                write!(f, "{{")?;
                for (i, (field, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field, value)?;
                }
                write!(f, "}}")
            }
            Payload::Set(members) => {
                write!(f, "{{")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", member)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<Scalar> for Payload {
    fn from(value: Scalar) -> Self {
        Payload::Scalar(value)
    }
}

/// One key slot: a payload plus its expiration.
///
/// `Clone` performs a deep copy of container payloads; transaction
/// snapshots rely on that to stay immune to later store mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub payload: Payload,
    /// Absolute expiration instant; `None` means the entry never expires.
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates an entry that never expires.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            expires_at: None,
        }
    }

    /// Creates an entry with an explicit expiration.
    pub fn with_expiration(payload: Payload, expires_at: Option<Instant>) -> Self {
        Self {
            payload,
            expires_at,
        }
    }

    /// The container category of this entry.
    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }

    /// Whether the expiration instant has passed.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }

    /// Remaining TTL in whole seconds, rounded down; `-1` when the entry
    /// has no expiration.
    pub fn ttl_seconds(&self) -> i64 {
        match self.expires_at {
            None => -1,
            Some(exp) => {
                let now = Instant::now();
                if now >= exp {
                    0
                } else {
                    (exp - now).as_secs() as i64
                }
            }
        }
    }
}
