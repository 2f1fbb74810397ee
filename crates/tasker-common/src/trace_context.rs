// W3C trace-context propagation.
// Only the identifiers are carried here; exporting spans is the job of the
// tracing subscriber the host installs.

use rand::Rng;
use std::fmt;

use crate::constants::TRACEPARENT_ENV;
use crate::context::StepContext;

/// Identifiers of the active span, propagated into task processes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: [u8; 16],
    span_id: [u8; 8],
    sampled: bool,
}

impl SpanContext {
    /// Start a new trace.
    pub fn new_root() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            trace_id: non_zero(rng.gen()),
            span_id: non_zero(rng.gen()),
            sampled: true,
        }
    }

    /// A new span within the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: non_zero(rand::thread_rng().gen()),
            sampled: self.sampled,
        }
    }

    pub fn trace_id(&self) -> String {
        hex::encode(self.trace_id)
    }

    pub fn span_id(&self) -> String {
        hex::encode(self.span_id)
    }

    /// The `traceparent` header value, `00-<trace id>-<span id>-<flags>`.
    pub fn traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{flags}", self.trace_id(), self.span_id())
    }

    /// Parse a `traceparent` header value. All-zero ids are invalid.
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != "00" {
            return None;
        }

        let trace_id: [u8; 16] = hex::decode(trace_id).ok()?.try_into().ok()?;
        let span_id: [u8; 8] = hex::decode(span_id).ok()?.try_into().ok()?;
        let flags = hex::decode(flags).ok()?;
        if flags.len() != 1 || trace_id == [0; 16] || span_id == [0; 8] {
            return None;
        }

        Some(Self {
            trace_id,
            span_id,
            sampled: flags[0] & 0x01 == 0x01,
        })
    }
}

impl fmt::Debug for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.traceparent())
    }
}

fn non_zero<const N: usize>(mut bytes: [u8; N]) -> [u8; N] {
    if bytes.iter().all(|b| *b == 0) {
        bytes[N - 1] = 1;
    }
    bytes
}

/// Whether task processes receive the trace propagation environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracingConfig {
    pub enabled: bool,
}

impl TracingConfig {
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// `TRACEPARENT=<header>` for the span active in `ctx`, if tracing is
    /// enabled and there is one.
    pub fn propagation_env(&self, ctx: &StepContext) -> Option<String> {
        if !self.enabled {
            return None;
        }
        ctx.span_context()
            .map(|span| format!("{TRACEPARENT_ENV}={}", span.traceparent()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceparent_round_trips() {
        let span = SpanContext::new_root();
        let header = span.traceparent();
        assert_eq!(header.len(), 55);
        assert!(header.starts_with("00-"));
        assert!(header.ends_with("-01"));
        assert_eq!(SpanContext::parse_traceparent(&header), Some(span));
    }

    #[test]
    fn child_keeps_trace_id() {
        let root = SpanContext::new_root();
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root.span_id());
    }

    #[test]
    fn rejects_malformed_headers() {
        for value in [
            "",
            "00-abc-def-01",
            "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
        ] {
            assert!(SpanContext::parse_traceparent(value).is_none(), "{value}");
        }

        let parsed = SpanContext::parse_traceparent(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00",
        )
        .unwrap();
        assert_eq!(parsed.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(parsed.traceparent().ends_with("-00"));
    }

    #[test]
    fn propagation_requires_enabled_config_and_span() {
        let ctx = StepContext::new();
        assert_eq!(TracingConfig::enabled().propagation_env(&ctx), None);

        let ctx = ctx.with_span(SpanContext::new_root());
        assert_eq!(TracingConfig::disabled().propagation_env(&ctx), None);

        let env = TracingConfig::enabled().propagation_env(&ctx).unwrap();
        assert!(env.starts_with("TRACEPARENT=00-"));
    }
}
