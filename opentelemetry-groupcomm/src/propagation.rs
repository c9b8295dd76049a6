//! Adapter between the interceptor and the external context propagator.

use std::fmt;

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

use crate::carrier::TraceCarrier;

/// Writes the ambient trace context into a [`TraceCarrier`] and
/// reconstructs a parent context from one.
///
/// The codec treats the wrapped [`TextMapPropagator`] as a black box; by
/// default it is the W3C [`TraceContextPropagator`]. Both directions degrade
/// rather than fail: injecting with no active span leaves the carrier empty,
/// and extracting from an empty or malformed carrier yields a context
/// equivalent to "no parent" — the expected state for the first message of a
/// trace.
pub struct ContextCodec {
    propagator: Box<dyn TextMapPropagator + Send + Sync>,
}

impl ContextCodec {
    /// Creates a codec around the given propagator.
    pub fn new(propagator: impl TextMapPropagator + Send + Sync + 'static) -> Self {
        Self {
            propagator: Box::new(propagator),
        }
    }

    /// Injects the calling thread's current context into `carrier`.
    ///
    /// With no meaningful ambient context this writes nothing, which is not
    /// an error.
    pub fn inject_current(&self, carrier: &mut TraceCarrier) {
        self.inject_context(&Context::current(), carrier);
    }

    /// Injects an explicit context into `carrier`.
    pub fn inject_context(&self, cx: &Context, carrier: &mut TraceCarrier) {
        self.propagator.inject_context(cx, carrier);
    }

    /// Returns a context suitable as the parent of a new span, extracted
    /// from `carrier`. Never fails; malformed or absent data yields a
    /// parentless context.
    pub fn extract_parent(&self, carrier: &TraceCarrier) -> Context {
        self.propagator.extract(carrier)
    }
}

impl Default for ContextCodec {
    fn default() -> Self {
        Self::new(TraceContextPropagator::new())
    }
}

impl fmt::Debug for ContextCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCodec")
            .field("propagator", &self.propagator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    fn remote_context() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
            SpanId::from_u64(0x00f0_67aa_0ba9_02b7),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    #[test]
    fn inject_without_active_span_leaves_carrier_empty() {
        let codec = ContextCodec::default();
        let mut carrier = TraceCarrier::new();
        codec.inject_context(&Context::new(), &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn extract_from_empty_carrier_yields_no_parent() {
        let codec = ContextCodec::default();
        let parent = codec.extract_parent(&TraceCarrier::new());
        assert!(!parent.span().span_context().is_valid());
    }

    #[test]
    fn extract_from_malformed_carrier_yields_no_parent() {
        let codec = ContextCodec::default();
        let mut carrier = TraceCarrier::new();
        carrier.set("traceparent", "not-a-w3c-header");
        let parent = codec.extract_parent(&carrier);
        assert!(!parent.span().span_context().is_valid());
    }

    #[test]
    fn injected_context_survives_extraction() {
        let codec = ContextCodec::default();
        let cx = remote_context();
        let mut carrier = TraceCarrier::new();
        codec.inject_context(&cx, &mut carrier);
        assert_eq!(carrier.get("traceparent").map(str::is_empty), Some(false));

        let parent = codec.extract_parent(&carrier);
        let extracted = parent.span().span_context().clone();
        assert_eq!(
            extracted.trace_id(),
            cx.span().span_context().trace_id(),
        );
        assert_eq!(extracted.span_id(), cx.span().span_context().span_id());
        assert!(extracted.is_remote());
    }
}
