use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::error::{Operation, StoreError};

/// Handle a sink uses to stop a stream early or fail it.
#[derive(Debug, Default)]
pub struct FlowControl {
    stopped: AtomicBool,
    error: OnceLock<String>,
}

impl FlowControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Fails the stream. The first detail wins.
    pub fn error(&self, detail: impl Into<String>) {
        let _ = self.error.set(detail.into());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.error.get().is_some()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error.get().map(String::as_str)
    }

    pub(crate) fn interrupted(&self, op: Operation) -> Option<StoreError> {
        if let Some(detail) = self.error.get() {
            return Some(StoreError::Aborted {
                op,
                detail: Some(detail.clone()),
            });
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Some(StoreError::Aborted { op, detail: None });
        }
        None
    }
}
