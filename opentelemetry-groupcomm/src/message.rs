//! Message and batch model of the host pipeline.
//!
//! These types mirror the envelope the surrounding group-communication
//! stack moves through its layers: an application payload plus an ordered
//! set of numbered headers, one slot of which is reserved for the trace
//! carrier.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Header id reserved for the trace carrier, unique within the host
/// pipeline's header namespace.
pub const TRACE_HEADER_ID: u16 = 550;

/// Identity of a node in the group.
///
/// Addresses are cheap to clone and compare; the interceptor only ever
/// renders them into span attributes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(Arc<str>);

impl Address {
    /// Creates an address from a node name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the node name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Envelope holding an application payload plus an ordered collection of
/// numbered headers.
#[derive(Clone, Debug, Default)]
pub struct Message {
    src: Option<Address>,
    dest: Option<Address>,
    payload: Bytes,
    headers: Vec<(u16, Bytes)>,
}

impl Message {
    /// Creates a message with the given payload and no addressing.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Sets the source address.
    pub fn with_src(mut self, src: impl Into<Address>) -> Self {
        self.src = Some(src.into());
        self
    }

    /// Sets the destination address.
    pub fn with_dest(mut self, dest: impl Into<Address>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// Returns the source address, if known.
    pub fn src(&self) -> Option<&Address> {
        self.src.as_ref()
    }

    /// Returns the destination address, if any.
    pub fn dest(&self) -> Option<&Address> {
        self.dest.as_ref()
    }

    /// Returns the application payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Attaches a header under `id`, replacing any existing header with the
    /// same id.
    pub fn put_header(&mut self, id: u16, data: impl Into<Bytes>) {
        let data = data.into();
        match self.headers.iter_mut().find(|(hdr_id, _)| *hdr_id == id) {
            Some(entry) => entry.1 = data,
            None => self.headers.push((id, data)),
        }
    }

    /// Returns the header stored under `id`, if any.
    pub fn header(&self, id: u16) -> Option<&Bytes> {
        self.headers
            .iter()
            .find(|(hdr_id, _)| *hdr_id == id)
            .map(|(_, data)| data)
    }

    /// Removes and returns the header stored under `id`.
    pub fn remove_header(&mut self, id: u16) -> Option<Bytes> {
        let index = self.headers.iter().position(|(hdr_id, _)| *hdr_id == id)?;
        Some(self.headers.remove(index).1)
    }
}

/// An ordered, possibly empty sequence of messages delivered to the
/// application layer in one up-call.
#[derive(Clone, Debug)]
pub struct MessageBatch {
    sender: Address,
    messages: Vec<Message>,
}

impl MessageBatch {
    /// Creates a batch of messages received from `sender`.
    pub fn new(sender: impl Into<Address>, messages: Vec<Message>) -> Self {
        Self {
            sender: sender.into(),
            messages,
        }
    }

    /// Returns the address the batch was received from.
    pub fn sender(&self) -> &Address {
        &self.sender
    }

    /// Returns the number of messages in the batch.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the batch holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the batched messages in delivery order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consumes the batch, yielding its messages.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
