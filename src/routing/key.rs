//! Routing key codec.
//!
//! Wire format is `<kind>:<id>` where `id` is a canonical hyphenated UUID
//! (36 characters). Broadcast uses the fixed key `broadcast:*`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::message::Address;

/// Separator between the kind and the identifier
pub const SEPARATOR: char = ':';

const KIND_USER: &str = "user";
const KIND_GROUP: &str = "group";
const KIND_BROADCAST: &str = "broadcast";
const BROADCAST_TARGET: &str = "*";

const CANONICAL_UUID_LEN: usize = 36;

/// Errors produced while decoding a routing key
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Record has no routing key")]
    MissingKey,

    #[error("Routing key is not valid UTF-8")]
    NonUtf8Key,

    #[error("Routing key {0:?} has no separator")]
    MissingSeparator(String),

    #[error("Unknown routing kind {0:?}")]
    UnknownKind(String),

    #[error("Invalid identifier {id:?} for kind {kind}")]
    InvalidId { kind: String, id: String },
}

impl FromStr for Address {
    type Err = DecodeError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let (kind, id) = key
            .split_once(SEPARATOR)
            .ok_or_else(|| DecodeError::MissingSeparator(key.to_string()))?;

        match kind {
            KIND_USER => parse_canonical(kind, id).map(Address::Unicast),
            KIND_GROUP => parse_canonical(kind, id).map(Address::Multicast),
            KIND_BROADCAST if id == BROADCAST_TARGET => Ok(Address::Broadcast),
            KIND_BROADCAST => Err(DecodeError::InvalidId {
                kind: kind.to_string(),
                id: id.to_string(),
            }),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

impl Address {
    /// Decode a raw broker key
    pub fn from_key_bytes(key: Option<&[u8]>) -> Result<Self, DecodeError> {
        let key = key.ok_or(DecodeError::MissingKey)?;
        let key = std::str::from_utf8(key).map_err(|_| DecodeError::NonUtf8Key)?;
        key.parse()
    }

    /// Encode as a routing key
    pub fn to_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Unicast(id) => write!(f, "{}{}{}", KIND_USER, SEPARATOR, id.hyphenated()),
            Address::Multicast(id) => {
                write!(f, "{}{}{}", KIND_GROUP, SEPARATOR, id.hyphenated())
            }
            Address::Broadcast => write!(f, "{}{}{}", KIND_BROADCAST, SEPARATOR, BROADCAST_TARGET),
        }
    }
}

fn parse_canonical(kind: &str, id: &str) -> Result<Uuid, DecodeError> {
    let invalid = || DecodeError::InvalidId {
        kind: kind.to_string(),
        id: id.to_string(),
    };

    // Uuid::try_parse also accepts simple, braced and urn forms
    if id.len() != CANONICAL_UUID_LEN {
        return Err(invalid());
    }
    Uuid::try_parse(id).map_err(|_| invalid())
}
