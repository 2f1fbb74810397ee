// StepContext: cancellation, deadline and trace propagation for one step.
// Cloning a context shares its cancellation; `child` and `with_timeout`
// derive contexts that are cancelled with their parent but never cancel it.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::trace_context::SpanContext;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct StepContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    span: Option<SpanContext>,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context cancelled through an existing token, e.g. one wired to Ctrl-C.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            span: None,
        }
    }

    /// A context that is cancelled with `self` and can be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            span: self.span.clone(),
        }
    }

    /// A child context that is additionally done after `timeout`. An earlier
    /// inherited deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let requested = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < requested => existing,
            _ => requested,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
            span: self.span.clone(),
        }
    }

    /// The same context carrying `span` as the active span.
    pub fn with_span(&self, span: SpanContext) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            span: Some(span),
        }
    }

    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `None` while the context is live. Cancellation wins over an expired
    /// deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            Some(ContextError::Canceled)
        } else if self.deadline_exceeded() {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Resolves when the deadline passes; never resolves without a deadline.
    pub async fn deadline_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Resolves once the context is done, with the reason.
    pub async fn done(&self) -> ContextError {
        tokio::select! {
            biased;
            _ = self.cancelled() => ContextError::Canceled,
            _ = self.deadline_elapsed() => ContextError::DeadlineExceeded,
        }
    }
}
