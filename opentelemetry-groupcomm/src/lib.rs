//! Trace-context propagation for layered group-communication pipelines.
//!
//! Message transports for distributed, asynchronous group communication
//! usually carry no native notion of tracing, which makes it hard to
//! correlate a send, its delivery and any downstream responses into one
//! trace tree. This crate instruments such a pipeline without touching
//! application logic: a [`TracingLayer`] is inserted just above the
//! transport, smuggles the current [OpenTelemetry] context across the wire
//! inside a reserved message header (the [`TraceCarrier`]), and records one
//! server span per delivered message — including batched delivery, where
//! every member of the batch gets its own span with correct success and
//! error attribution.
//!
//! The layer is transparent to its neighbours, adds no threads and no
//! blocking, ends every span it creates exactly once on every control path,
//! and degrades to a strict pass-through when deactivated at runtime.
//! Sampling, exporters and span storage remain the business of the
//! configured tracing SDK.
//!
//! # Getting started
//!
//! ```
//! use std::sync::Arc;
//! use opentelemetry::{global, trace::{TraceContextExt, Tracer}, Context};
//! use opentelemetry_groupcomm::{
//!     Message, MessageBatch, PipelineError, PipelineLayer, TracingLayer,
//! };
//!
//! // The neighbouring layers: the application above, the transport below.
//! struct Sink;
//!
//! impl PipelineLayer for Sink {
//!     fn down(&self, _msg: Message) -> Result<(), PipelineError> {
//!         Ok(())
//!     }
//!     fn up(&self, _msg: Message) -> Result<(), PipelineError> {
//!         Ok(())
//!     }
//!     fn up_batch(&self, _batch: MessageBatch) -> Result<(), PipelineError> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), PipelineError> {
//! let sink: Arc<dyn PipelineLayer> = Arc::new(Sink);
//! let layer = TracingLayer::builder().build(sink.clone(), sink);
//!
//! // Application code opens a span around the send; the layer captures it
//! // into the outgoing message's carrier header.
//! let tracer = global::tracer("app");
//! let span = tracer.start("request");
//! let cx = Context::current_with_span(span);
//! let _guard = cx.attach();
//! layer.down(Message::new("payload").with_dest("B"))?;
//! # Ok(())
//! # }
//! ```
//!
//! [OpenTelemetry]: https://opentelemetry.io
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(
    docsrs,
    feature(doc_cfg, doc_auto_cfg),
    deny(rustdoc::broken_intra_doc_links)
)]
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/open-telemetry/opentelemetry-rust/main/assets/logo.svg"
)]
#![cfg_attr(test, deny(warnings))]

mod carrier;
mod layer;
mod message;
mod pipeline;
mod propagation;

pub use carrier::{CarrierError, TraceCarrier};
pub use layer::{
    TracingLayer, TracingLayerBuilder, BATCH_POSITION_ATTRIBUTE, DELIVER_BATCHED_SPAN_NAME,
    DELIVER_SINGLE_SPAN_NAME, SOURCE_ATTRIBUTE,
};
pub use message::{Address, Message, MessageBatch, TRACE_HEADER_ID};
pub use pipeline::{PipelineError, PipelineLayer};
pub use propagation::ContextCodec;
