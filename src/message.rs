//! The message/serialization contract consumed by the rest of the crate.
//!
//! The wire format and the message class system belong to whatever
//! deployment plugs a transport in; what lives here is the *descriptor*
//! data model topics use to check compatibility between handles, plus one
//! concrete, minimal serializer so the crate is runnable and testable
//! standalone without a real transport stack plugged in.

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Fundamental trait for any type usable as a topic's payload.
///
/// A const-based descriptor rather than a runtime-constructed one, so two
/// `Publisher<T>`/`Subscriber<T>` handles for incompatible `T`s fail to
/// compile rather than at runtime.
pub trait MessageType:
    'static + Send + Sync + Clone + std::fmt::Debug + Serialize + DeserializeOwned
{
    /// Stable name for the type, e.g. `"geometry/PointStamped"`.
    const TYPE_NAME: &'static str;

    /// Schema fingerprint used to detect incompatible publishers/subscribers
    /// sharing a topic name. `"*"` opts out of the check, marking a generic
    /// subscription that accepts any schema under the matching type name.
    const MD5SUM: &'static str = "";

    /// Human-readable schema definition, used only to compute `MD5SUM` for
    /// generated types; not interpreted by this crate.
    const DEFINITION: &'static str = "";
}

/// A generic payload type used for subscriptions that don't care about the
/// concrete message schema.
#[derive(serde::Serialize, serde::Deserialize, Debug, Default, Clone, PartialEq)]
pub struct AnyMessage(pub Vec<u8>);

impl MessageType for AnyMessage {
    const TYPE_NAME: &'static str = "*";
    const MD5SUM: &'static str = "*";
    const DEFINITION: &'static str = "";
}

/// Runtime snapshot of a [`MessageType`]'s identity, used where the concrete
/// type has already been erased (topic manager bookkeeping, stats, handles
/// at the boundary between two differently-typed topics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub type_name: &'static str,
    pub md5sum: &'static str,
}

impl Descriptor {
    pub fn of<T: MessageType>() -> Self {
        Descriptor {
            type_name: T::TYPE_NAME,
            md5sum: T::MD5SUM,
        }
    }

    /// A second handle attempting to acquire the same resolved name must
    /// supply a compatible descriptor. `"*"` on either side short-circuits
    /// the check, the generic-subscription carve-out for md5sum `"*"`.
    pub fn is_compatible(&self, other: &Descriptor) -> bool {
        if self.md5sum == "*" || other.md5sum == "*" {
            return self.type_name == other.type_name || self.type_name == "*" || other.type_name == "*";
        }
        self.type_name == other.type_name && self.md5sum == other.md5sum
    }
}

/// Computes a schema fingerprint from a definition string, for generated
/// message types to derive their `MD5SUM` from.
pub fn compute_md5sum(definition: &str) -> String {
    format!("{:x}", md5::compute(definition.as_bytes()))
}

/// Appends a length-prefixed encoding of `(seq, message)` to `buffer`.
///
/// Format: `seq` as 8 little-endian bytes, then a 4-byte little-endian
/// payload length, then the JSON-encoded message. This crate's own choice
/// of wire format is incidental; a real deployment supplies its own
/// schema-aware codec through this same call site.
pub fn serialize_message<T: MessageType>(buffer: &mut Vec<u8>, seq: u64, message: &T) -> Result<()> {
    let payload = serde_json::to_vec(message).map_err(|e| Error::Serialization(e.to_string()))?;
    buffer.extend_from_slice(&seq.to_le_bytes());
    buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buffer.extend_from_slice(&payload);
    Ok(())
}

/// Inverse of [`serialize_message`]; returns the sequence number and the
/// decoded message.
pub fn deserialize_message<T: MessageType>(bytes: &[u8]) -> Result<(u64, T)> {
    if bytes.len() < 12 {
        return Err(Error::Serialization("truncated message header".to_string()));
    }
    let seq = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let payload = bytes
        .get(12..12 + len)
        .ok_or_else(|| Error::Serialization("truncated message payload".to_string()))?;
    let message = serde_json::from_slice(payload).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok((seq, message))
}
