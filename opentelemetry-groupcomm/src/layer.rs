//! The pipeline interceptor recording spans for sent and received messages.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use opentelemetry::global::{self, GlobalTracerProvider};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, InstrumentationScope, KeyValue};

use crate::carrier::TraceCarrier;
use crate::message::{Address, Message, MessageBatch, TRACE_HEADER_ID};
use crate::pipeline::{PipelineError, PipelineLayer};
use crate::propagation::ContextCodec;

/// Name of spans recording single-message delivery.
pub const DELIVER_SINGLE_SPAN_NAME: &str = "deliver-single-msg";

/// Name of spans recording delivery of one message inside a batch.
pub const DELIVER_BATCHED_SPAN_NAME: &str = "deliver-batched-msg";

/// Attribute carrying the source address of a received message.
pub const SOURCE_ATTRIBUTE: &str = "from";

/// Attribute carrying a batched message's 1-based position and the batch
/// size, e.g. `"3/7"`.
pub const BATCH_POSITION_ATTRIBUTE: &str = "batch-msg";

const SCOPE_NAME: &str = env!("CARGO_PKG_NAME");
const SCOPE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bidirectional pipeline interceptor that propagates trace context across
/// the wire and records one server span per delivered message.
///
/// The layer sits just above the transport. On the down path it captures
/// whatever span is ambient at the send site into a [`TraceCarrier`] header;
/// it never starts spans of its own there. On the up paths it extracts the
/// parent context from that header, starts a [`SpanKind::Server`] span per
/// message, makes it ambient for the synchronous delegation to the layer
/// above, and ends it exactly once on every control path. Failures raised by
/// the layer above are recorded on the span(s) and forwarded unchanged.
///
/// The interceptor introduces no concurrency and no blocking of its own;
/// the activation switch is the only state shared across invocations.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use opentelemetry_groupcomm::{
///     Message, MessageBatch, PipelineError, PipelineLayer, TracingLayer,
/// };
///
/// struct Sink;
///
/// impl PipelineLayer for Sink {
///     fn down(&self, _msg: Message) -> Result<(), PipelineError> {
///         Ok(())
///     }
///     fn up(&self, _msg: Message) -> Result<(), PipelineError> {
///         Ok(())
///     }
///     fn up_batch(&self, _batch: MessageBatch) -> Result<(), PipelineError> {
///         Ok(())
///     }
/// }
///
/// let sink: Arc<dyn PipelineLayer> = Arc::new(Sink);
/// let layer = TracingLayer::builder().build(sink.clone(), sink);
/// layer.down(Message::new("payload").with_dest("B"))?;
/// # Ok::<(), PipelineError>(())
/// ```
pub struct TracingLayer<P: TracerProvider = GlobalTracerProvider> {
    provider: P,
    codec: ContextCodec,
    tracer: OnceLock<P::Tracer>,
    active: AtomicBool,
    up_next: Arc<dyn PipelineLayer>,
    down_next: Arc<dyn PipelineLayer>,
}

impl TracingLayer<GlobalTracerProvider> {
    /// Starts building a layer bound to the process-wide tracer provider.
    pub fn builder() -> TracingLayerBuilder<GlobalTracerProvider> {
        TracingLayerBuilder::default()
    }
}

impl<P: TracerProvider> TracingLayer<P> {
    /// Turns tracing on or off for all four interceptor operations.
    ///
    /// The first activation resolves a tracer from the provider and caches
    /// it; deactivation keeps the cached tracer so re-enabling is cheap.
    pub fn set_active(&self, active: bool) {
        if active {
            self.tracer.get_or_init(|| {
                let scope = InstrumentationScope::builder(SCOPE_NAME)
                    .with_version(SCOPE_VERSION)
                    .build();
                self.provider.tracer_with_scope(scope)
            });
        }
        let previous = self.active.swap(active, Ordering::Release);
        if previous != active {
            tracing::debug!(active, "message tracing toggled");
        }
    }

    /// Returns whether the layer currently records traces.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the cached tracer when tracing is on.
    ///
    /// `set_active` initializes the tracer before it publishes the flag, so
    /// a visible `true` implies the tracer is bound.
    fn tracer(&self) -> Option<&P::Tracer> {
        if self.active.load(Ordering::Acquire) {
            self.tracer.get()
        } else {
            None
        }
    }

    /// Intercepts one outgoing message.
    ///
    /// Captures the span already ambient at the call site into a fresh
    /// carrier and attaches it under [`TRACE_HEADER_ID`]; with no ambient
    /// span the carrier travels empty. This call never creates or ends a
    /// span.
    pub fn down(&self, mut msg: Message) -> Result<(), PipelineError> {
        if self.tracer().is_none() {
            return self.down_next.down(msg);
        }
        let mut carrier = TraceCarrier::new();
        self.codec.inject_current(&mut carrier);
        match carrier.encode() {
            Ok(encoded) => msg.put_header(TRACE_HEADER_ID, encoded),
            Err(err) => {
                tracing::debug!(%err, "dropping trace header of outgoing message");
            }
        }
        self.down_next.down(msg)
    }

    /// Intercepts one incoming message.
    ///
    /// Starts a server span parented on the context extracted from the
    /// message's carrier header (or a root span without one), makes it
    /// ambient while the message is delegated to the layer above, and ends
    /// it exactly once with a status derived from the delegation outcome.
    pub fn up(&self, msg: Message) -> Result<(), PipelineError>
    where
        <P::Tracer as Tracer>::Span: Send + Sync + 'static,
    {
        let Some(tracer) = self.tracer() else {
            return self.up_next.up(msg);
        };
        let parent_cx = self.extract_parent(&msg);
        let src = msg.src().cloned();
        let mut builder = tracer
            .span_builder(DELIVER_SINGLE_SPAN_NAME)
            .with_kind(SpanKind::Server);
        if let Some(src) = &src {
            builder = builder.with_attributes([KeyValue::new(SOURCE_ATTRIBUTE, src.to_string())]);
        }
        let span = builder.start_with_context(tracer, &parent_cx);
        let cx = parent_cx.with_span(span);

        let result = {
            let _guard = cx.clone().attach();
            self.up_next.up(msg)
        };

        let span = cx.span();
        match &result {
            Ok(()) => span.set_status(Status::Ok),
            Err(err) => {
                let from = src.as_ref().map_or("unknown", Address::as_str);
                span.set_status(Status::error(format!(
                    "failed delivering single message from {from}"
                )));
                span.record_error(err);
            }
        }
        span.end();
        result
    }

    /// Intercepts a batch of incoming messages.
    ///
    /// Starts one server span per batched message, each parented on its own
    /// message's carrier and tagged with its position, then delegates the
    /// whole batch once. All spans are finalized together: a delegation
    /// failure cannot be attributed to a single member, so every span in the
    /// batch records it. An empty batch passes through with no span
    /// activity.
    pub fn up_batch(&self, batch: MessageBatch) -> Result<(), PipelineError> {
        let Some(tracer) = self.tracer() else {
            return self.up_next.up_batch(batch);
        };
        if batch.is_empty() {
            return self.up_next.up_batch(batch);
        }

        let size = batch.len();
        let sender = batch.sender().clone();
        let mut spans = Vec::with_capacity(size);
        for (index, msg) in batch.messages().iter().enumerate() {
            let parent_cx = self.extract_parent(msg);
            let span = tracer
                .span_builder(DELIVER_BATCHED_SPAN_NAME)
                .with_kind(SpanKind::Server)
                .with_attributes([KeyValue::new(
                    BATCH_POSITION_ATTRIBUTE,
                    format!("{}/{}", index + 1, size),
                )])
                .start_with_context(tracer, &parent_cx);
            spans.push(span);
        }

        let result = self.up_next.up_batch(batch);

        match &result {
            Ok(()) => {
                for span in &mut spans {
                    span.set_status(Status::Ok);
                }
            }
            Err(err) => {
                let description = format!("failed delivering batched message from {sender}");
                for span in &mut spans {
                    span.set_status(Status::error(description.clone()));
                    span.record_error(err);
                }
            }
        }
        for mut span in spans {
            span.end();
        }
        result
    }

    /// Rebuilds the carrier from the reserved header and extracts the
    /// parent context. Absent or malformed header data degrades to "no
    /// parent"; it is the expected state for the first message of a trace.
    fn extract_parent(&self, msg: &Message) -> Context {
        let carrier = match msg.header(TRACE_HEADER_ID) {
            Some(bytes) => TraceCarrier::decode(bytes).unwrap_or_else(|err| {
                tracing::debug!(%err, "malformed trace header, starting a root span");
                TraceCarrier::new()
            }),
            None => TraceCarrier::new(),
        };
        self.codec.extract_parent(&carrier)
    }
}

impl<P> PipelineLayer for TracingLayer<P>
where
    P: TracerProvider + Send + Sync,
    P::Tracer: Send + Sync,
    <P::Tracer as Tracer>::Span: Send + Sync + 'static,
{
    fn down(&self, msg: Message) -> Result<(), PipelineError> {
        TracingLayer::down(self, msg)
    }

    fn up(&self, msg: Message) -> Result<(), PipelineError> {
        TracingLayer::up(self, msg)
    }

    fn up_batch(&self, batch: MessageBatch) -> Result<(), PipelineError> {
        TracingLayer::up_batch(self, batch)
    }
}

impl<P: TracerProvider> fmt::Debug for TracingLayer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingLayer")
            .field("active", &self.is_active())
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TracingLayer`].
pub struct TracingLayerBuilder<P: TracerProvider = GlobalTracerProvider> {
    provider: P,
    codec: ContextCodec,
    active: bool,
}

impl Default for TracingLayerBuilder<GlobalTracerProvider> {
    fn default() -> Self {
        Self {
            provider: global::tracer_provider(),
            codec: ContextCodec::default(),
            active: true,
        }
    }
}

impl<P: TracerProvider> TracingLayerBuilder<P> {
    /// Uses an explicit tracer provider instead of the process-wide one.
    pub fn with_tracer_provider<Q: TracerProvider>(self, provider: Q) -> TracingLayerBuilder<Q> {
        TracingLayerBuilder {
            provider,
            codec: self.codec,
            active: self.active,
        }
    }

    /// Replaces the default W3C propagator.
    pub fn with_propagator(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        self.codec = ContextCodec::new(propagator);
        self
    }

    /// Sets the initial activation state. Tracing is on by default.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Builds the layer between its two neighbours: `up_next` receives the
    /// delegated up-calls, `down_next` the forwarded down-calls.
    pub fn build(
        self,
        up_next: Arc<dyn PipelineLayer>,
        down_next: Arc<dyn PipelineLayer>,
    ) -> TracingLayer<P> {
        let layer = TracingLayer {
            provider: self.provider,
            codec: self.codec,
            tracer: OnceLock::new(),
            active: AtomicBool::new(false),
            up_next,
            down_next,
        };
        layer.set_active(self.active);
        layer
    }
}

impl<P: TracerProvider> fmt::Debug for TracingLayerBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingLayerBuilder")
            .field("active", &self.active)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
