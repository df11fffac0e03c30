//! Progress reporting and cooperative cancellation for long resampling runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, StackError};

/// Events emitted while a run progresses
#[derive(Debug, Clone)]
pub enum StackEvent {
    /// Table built from the input spectra
    TableBuilt { n_objects: usize, n_pixels: usize },
    /// One bootstrap iteration finished
    BootstrapIteration { completed: usize, total: usize },
    /// One jackknife group finished (successfully or not)
    JackknifeGroup {
        completed: usize,
        total: usize,
        group: usize,
        ok: bool,
    },
    /// Reference continuum fitted
    ContinuumFitted { n_lines: usize },
}

/// Callback function type
pub type StackCallback = Arc<dyn Fn(&StackEvent) + Send + Sync>;

/// Shared flag checked between iterations
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Callback plus cancel token handed to the resampling estimators.
#[derive(Clone, Default)]
pub struct Checkpoint {
    callback: Option<StackCallback>,
    cancel: CancelToken,
}

impl fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkpoint")
            .field("callback", &self.callback.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Checkpoint {
    pub fn new(callback: Option<StackCallback>, cancel: CancelToken) -> Self {
        Self { callback, cancel }
    }

    pub fn with_callback(mut self, callback: StackCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn emit(&self, event: &StackEvent) {
        log::debug!("{event:?}");
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    /// `Err(StackError::Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(StackError::Cancelled)
        } else {
            Ok(())
        }
    }
}
