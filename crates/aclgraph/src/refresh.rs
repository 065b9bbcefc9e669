//! Change notifications for policy caches.
//!
//! After a mutation that changed stored data commits, the service calls
//! [`RefreshListener::refresh`] once with the action name. An idempotent
//! grant that found its entry, or a revoke that matched nothing, does not
//! notify.

use std::sync::Mutex;

use tokio::sync::watch;
use tracing::debug;

/// Told when stored ACL data changed. Must be cheap and must not fail.
pub trait RefreshListener: Send + Sync {
    fn refresh(&self, action: &str);
}

/// Ignores every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRefreshListener;

impl RefreshListener for NoopRefreshListener {
    fn refresh(&self, _action: &str) {}
}

/// Bumps a generation counter on a [`watch`] channel.
///
/// Caches hold a receiver and reload once the generation moves past the
/// one they were built from.
#[derive(Debug)]
pub struct WatchRefreshListener {
    tx: watch::Sender<u64>,
}

impl WatchRefreshListener {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Changes published so far.
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl Default for WatchRefreshListener {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshListener for WatchRefreshListener {
    fn refresh(&self, action: &str) {
        self.tx.send_modify(|generation| *generation += 1);
        debug!(action, generation = self.generation(), "acl policy refresh published");
    }
}

/// Keeps the action of every notification. Useful for tests.
#[derive(Debug, Default)]
pub struct InMemoryRefreshListener {
    actions: Mutex<Vec<String>>,
}

impl InMemoryRefreshListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.actions().len()
    }
}

impl RefreshListener for InMemoryRefreshListener {
    fn refresh(&self, action: &str) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action.to_owned());
        }
    }
}
