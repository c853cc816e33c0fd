//! Cancellation scopes bounding the lifetime of device-bound work

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use adblib_core::prelude::*;

/// Cancellable scope. Clones share the same cancellation state.
#[derive(Debug, Clone)]
pub struct DeviceScope {
    cancelled: Arc<watch::Sender<bool>>,
}

impl Default for DeviceScope {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceScope {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
        }
    }

    /// Scope that starts out cancelled, handed out for unknown devices
    pub fn cancelled_scope() -> Self {
        let scope = Self::new();
        scope.cancel();
        scope
    }

    /// Child scope, cancelled together with `self` or on its own
    pub fn child(&self) -> Self {
        let child = Self::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        let parent = self.clone();
        let handle = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => handle.cancel(),
                _ = handle.cancelled() => {}
            }
        });
        child
    }

    pub fn cancel(&self) {
        self.cancelled.send_if_modified(|cancelled| {
            let changed = !*cancelled;
            *cancelled = true;
            changed
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.subscribe();
        // The sender lives in `self`, so waiting cannot fail
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` until it completes or the scope is cancelled
    ///
    /// Returns `None` from the task when cancellation won.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let scope = self.clone();
        tokio::spawn(async move {
            if scope.is_cancelled() {
                return None;
            }
            tokio::select! {
                output = fut => Some(output),
                _ = scope.cancelled() => {
                    trace!("Scoped task cancelled");
                    None
                }
            }
        })
    }
}
