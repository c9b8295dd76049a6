//! Wire carrier for trace context attached to messages as metadata.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use opentelemetry::propagation::{Extractor, Injector};
use thiserror::Error;

/// Longest key or value a carrier entry can hold, implied by the `u16`
/// length prefix of the wire format.
const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Upper bound on the pair count accepted during decoding. A well-formed
/// carrier holds a handful of propagation fields; anything past this is a
/// corrupt count prefix.
const MAX_PAIRS: u32 = 1 << 16;

/// Error returned when a [`TraceCarrier`] cannot be encoded or decoded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CarrierError {
    /// The input ended before the declared contents were read.
    #[error("carrier data truncated, {missing} more bytes expected")]
    Truncated {
        /// Number of bytes missing from the input.
        missing: usize,
    },
    /// A key or value is not valid UTF-8.
    #[error("carrier field is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// A key or value does not fit the `u16` length prefix.
    #[error("carrier field of {len} bytes exceeds the {MAX_FIELD_LEN} byte limit")]
    FieldTooLong {
        /// Byte length of the offending field.
        len: usize,
    },
    /// The count prefix is beyond what a well-formed carrier can declare.
    #[error("carrier declares {count} pairs, more than the {MAX_PAIRS} supported")]
    TooManyPairs {
        /// The declared pair count.
        count: u32,
    },
}

/// Flat, ordered collection of string key/value pairs carried on a message
/// as metadata.
///
/// The carrier is the only tracing state exchanged over the wire. Keys are
/// unique; values are opaque to this layer and interpreted only by the
/// configured propagator. A carrier is constructed empty by the sender,
/// populated once by injection, attached to exactly one outgoing message
/// under [`TRACE_HEADER_ID`](crate::message::TRACE_HEADER_ID), and read at
/// most once by the receiver during extraction.
///
/// The wire representation is a big-endian `u32` pair count followed by that
/// many key/value pairs, each field a `u16`-length-prefixed UTF-8 string. An
/// empty carrier encodes as the count `0` and nothing else.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceCarrier {
    entries: Vec<(String, String)>,
}

impl TraceCarrier {
    /// Creates an empty carrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of key/value pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the carrier holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sets `key` to `value`, replacing an existing entry in place so that
    /// keys stay unique and insertion order is preserved.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over the keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterates over the key/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the exact byte length of [`encode`](Self::encode)'s output.
    pub fn encoded_len(&self) -> usize {
        4 + self
            .entries
            .iter()
            .map(|(k, v)| 4 + k.len() + v.len())
            .sum::<usize>()
    }

    /// Serializes the carrier into its wire representation.
    pub fn encode(&self) -> Result<Bytes, CarrierError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32(self.entries.len() as u32);
        for (key, value) in &self.entries {
            put_field(&mut buf, key)?;
            put_field(&mut buf, value)?;
        }
        Ok(buf.freeze())
    }

    /// Reconstructs a carrier from its wire representation.
    ///
    /// A count of `0` yields an empty carrier with no further reads.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, CarrierError> {
        if bytes.remaining() < 4 {
            return Err(CarrierError::Truncated {
                missing: 4 - bytes.remaining(),
            });
        }
        let count = bytes.get_u32();
        if count > MAX_PAIRS {
            return Err(CarrierError::TooManyPairs { count });
        }
        let mut entries = Vec::with_capacity(count.min(16) as usize);
        for _ in 0..count {
            let key = read_field(&mut bytes)?;
            let value = read_field(&mut bytes)?;
            entries.push((key, value));
        }
        Ok(Self { entries })
    }
}

fn put_field(buf: &mut BytesMut, field: &str) -> Result<(), CarrierError> {
    if field.len() > MAX_FIELD_LEN {
        return Err(CarrierError::FieldTooLong { len: field.len() });
    }
    buf.put_u16(field.len() as u16);
    buf.put_slice(field.as_bytes());
    Ok(())
}

fn read_field(bytes: &mut &[u8]) -> Result<String, CarrierError> {
    if bytes.remaining() < 2 {
        return Err(CarrierError::Truncated {
            missing: 2 - bytes.remaining(),
        });
    }
    let len = bytes.get_u16() as usize;
    if bytes.remaining() < len {
        return Err(CarrierError::Truncated {
            missing: len - bytes.remaining(),
        });
    }
    let field = std::str::from_utf8(&bytes[..len])?.to_owned();
    bytes.advance(len);
    Ok(field)
}

impl Injector for TraceCarrier {
    fn set(&mut self, key: &str, value: String) {
        TraceCarrier::set(self, key, value);
    }
}

impl Extractor for TraceCarrier {
    fn get(&self, key: &str) -> Option<&str> {
        TraceCarrier::get(self, key)
    }

    fn keys(&self) -> Vec<&str> {
        TraceCarrier::keys(self).collect()
    }
}
