//! Broadcast-once shutdown signal shared by the relay pipelines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

struct Inner {
    shutdown: AtomicBool,
    /// Never sent on; dropping it disconnects `wake_rx`, which wakes every
    /// blocked `select!` and `recv_timeout` at once.
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(0);
        Self {
            shutdown: AtomicBool::new(false),
            wake_tx: Mutex::new(Some(wake_tx)),
            wake_rx,
            children: Mutex::new(Vec::new()),
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.wake_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let children = std::mem::take(
            &mut *self.children.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for child in children.iter().filter_map(Weak::upgrade) {
            child.shutdown();
        }
    }
}

/// Cooperative cancellation token for one relay.
///
/// Cloning yields another handle to the same signal. Asserting it is
/// idempotent and can not be undone.
#[derive(Clone)]
pub struct RelayControl {
    inner: Arc<Inner>,
}

impl RelayControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Assert the signal, waking everything waiting on it.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// A token that is shut down together with `self`, but can also be shut
    /// down on its own without affecting `self`.
    pub fn child_token(&self) -> RelayControl {
        let child = RelayControl::new();
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // `shutdown` sets the flag before taking the children, so either it
        // sees the child registered above or we see the flag here.
        if self.is_shutdown() {
            child.shutdown();
        }
        child
    }

    /// Sleep up to `timeout`, returning early with `true` on shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        match self.inner.wake_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_shutdown(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Block until the signal is asserted.
    pub fn wait(&self) {
        while !self.is_shutdown() {
            let _ = self.inner.wake_rx.recv();
        }
    }

    /// Channel that becomes disconnected on shutdown, for use in `select!`.
    pub(crate) fn wake_channel(&self) -> &Receiver<()> {
        &self.inner.wake_rx
    }
}

impl Default for RelayControl {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RelayControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayControl")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
