//! The layered pipeline contract the interceptor plugs into.

use thiserror::Error;

use crate::message::{Message, MessageBatch};

/// Error returned by a pipeline layer.
///
/// An `Err` travelling back through the stack is the equivalent of a thrown
/// delivery error in the host pipeline: interceptors may observe it but must
/// forward it unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// An incoming message or batch could not be delivered to the layer
    /// above.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// The transport rejected an outgoing message.
    #[error("send failed: {0}")]
    Send(String),
    /// Any other failure raised by a layer.
    #[error(transparent)]
    Layer(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// One stage in an ordered, bidirectional chain of message-processing
/// layers.
///
/// Down-calls carry outgoing messages toward the transport; up-calls carry
/// incoming messages toward the application. Layers execute synchronously on
/// whichever thread the neighbouring layer calls in on and must not reorder
/// the messages or batches handed to them.
pub trait PipelineLayer: Send + Sync {
    /// Handles one outgoing message.
    fn down(&self, msg: Message) -> Result<(), PipelineError>;

    /// Handles one incoming message.
    fn up(&self, msg: Message) -> Result<(), PipelineError>;

    /// Handles a batch of incoming messages delivered as a single unit.
    fn up_batch(&self, batch: MessageBatch) -> Result<(), PipelineError>;
}
