use kp_utils::service::ServiceContext;
use kp_utils::StartStopOnce;
use std::sync::{Mutex, PoisonError};

/// Start-once / close-once state of a long-running component, holding the
/// child context its tasks run under.
#[derive(Default)]
pub(crate) struct Lifecycle {
    once: StartStopOnce,
    ctx: Mutex<Option<ServiceContext>>,
}

impl Lifecycle {
    /// Returns the context to run the component's tasks under, or [None]
    /// if it was already started.
    pub fn begin(&self, parent: &ServiceContext) -> Option<ServiceContext> {
        if !self.once.start() {
            return None;
        }
        let ctx = parent.child();
        *self.ctx.lock().unwrap_or_else(PoisonError::into_inner) = Some(ctx.clone());
        Some(ctx)
    }

    /// Cancels the component's tasks. Returns `false` if it was not running.
    pub fn end(&self) -> bool {
        if !self.once.stop() {
            return false;
        }
        if let Some(ctx) = self.ctx.lock().unwrap_or_else(PoisonError::into_inner).take() {
            ctx.cancel_local();
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.once.is_running()
    }
}
