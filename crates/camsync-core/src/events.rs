//! Typed publish/subscribe for synchronizer events.
//!
//! Handlers run synchronously in registration order. A handler that returns
//! an error or panics is reported to the sync-error handlers and delivery
//! continues with the next handler.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use camsync_models::{CompositeFrame, FocusState};
use tracing::{error, warn};

use crate::error::{BoxError, SyncError};
use crate::metrics;

/// Result returned by event handlers.
pub type HandlerResult = Result<(), BoxError>;

/// Handler for emitted composite frames.
pub type CompositeHandler = Arc<dyn Fn(&CompositeFrame) -> HandlerResult + Send + Sync>;

/// Handler for focus changes; `None` means the focus was cleared.
pub type FocusHandler = Arc<dyn Fn(Option<&FocusState>) -> HandlerResult + Send + Sync>;

/// Handler for non-fatal faults.
pub type SyncErrorHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Handler registry for one synchronizer.
#[derive(Clone, Default)]
pub struct EventBus {
    composite: Vec<CompositeHandler>,
    focus: Vec<FocusHandler>,
    errors: Vec<SyncErrorHandler>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("composite_handlers", &self.composite.len())
            .field("focus_handlers", &self.focus.len())
            .field("error_handlers", &self.errors.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to emitted composite frames.
    pub fn on_composite_frame<F>(&mut self, handler: F)
    where
        F: Fn(&CompositeFrame) -> HandlerResult + Send + Sync + 'static,
    {
        self.composite.push(Arc::new(handler));
    }

    /// Subscribe to focus changes.
    pub fn on_focus_changed<F>(&mut self, handler: F)
    where
        F: Fn(Option<&FocusState>) -> HandlerResult + Send + Sync + 'static,
    {
        self.focus.push(Arc::new(handler));
    }

    /// Subscribe to internal faults.
    pub fn on_sync_error<F>(&mut self, handler: F)
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        self.errors.push(Arc::new(handler));
    }

    /// Deliver a composite frame to every subscriber.
    pub fn emit_composite(&self, frame: &CompositeFrame) {
        for handler in &self.composite {
            self.guard("composite_frame", || handler(frame));
        }
    }

    /// Deliver a focus change to every subscriber.
    pub fn emit_focus(&self, focus: Option<&FocusState>) {
        for handler in &self.focus {
            self.guard("focus_changed", || handler(focus));
        }
    }

    /// Report a fault to every error subscriber.
    ///
    /// Faults inside error handlers are logged only.
    pub fn emit_error(&self, err: &SyncError) {
        warn!(kind = err.kind(), "Sync error: {}", err);
        metrics::record_sync_error(err.kind());

        for handler in &self.errors {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(err))) {
                error!(
                    "Sync error handler panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn guard(&self, event: &'static str, call: impl FnOnce() -> HandlerResult) {
        let failure = match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        self.emit_error(&SyncError::handler_failed(event, failure));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
