//! After-commit delivery of role lifecycle events.
//!
//! The identity service buffers events in a [`PendingRoleEvents`] handle
//! while its own transaction is open. Only [`PendingRoleEvents::commit`]
//! releases them to the synchronizer; a rollback or a dropped handle
//! discards them, so a failed role transaction never touches SIDs.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::events::RoleLifecycleEvent;

/// Create a connected outbox and receiver.
pub fn channel() -> (RoleEventOutbox, RoleEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RoleEventOutbox { tx }, RoleEventReceiver { rx })
}

/// Producer side. Cheap to clone; the receiver ends once every clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct RoleEventOutbox {
    tx: mpsc::UnboundedSender<RoleLifecycleEvent>,
}

impl RoleEventOutbox {
    /// Open a buffer tied to one role transaction.
    pub fn begin(&self) -> PendingRoleEvents {
        PendingRoleEvents {
            tx: self.tx.clone(),
            events: Vec::new(),
        }
    }

    /// True once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Events raised inside a not-yet-committed role transaction.
#[derive(Debug)]
pub struct PendingRoleEvents {
    tx: mpsc::UnboundedSender<RoleLifecycleEvent>,
    events: Vec<RoleLifecycleEvent>,
}

impl PendingRoleEvents {
    pub fn push(&mut self, event: RoleLifecycleEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The role transaction committed: hand the events over in order.
    ///
    /// Returns the number delivered.
    pub fn commit(mut self) -> Result<usize> {
        let events = std::mem::take(&mut self.events);
        let count = events.len();
        for event in events {
            self.tx.send(event).map_err(|_| SyncError::Closed)?;
        }
        Ok(count)
    }

    /// The role transaction rolled back. Returns the number discarded.
    pub fn rollback(mut self) -> usize {
        let discarded = self.events.len();
        self.events.clear();
        debug!(discarded, "role transaction rolled back, events discarded");
        discarded
    }
}

impl Drop for PendingRoleEvents {
    fn drop(&mut self) {
        if !self.events.is_empty() {
            debug!(
                discarded = self.events.len(),
                "pending role events dropped without commit"
            );
        }
    }
}

/// Consumer side, usually owned by the synchronizer task.
#[derive(Debug)]
pub struct RoleEventReceiver {
    rx: mpsc::UnboundedReceiver<RoleLifecycleEvent>,
}

impl RoleEventReceiver {
    /// Next committed event, or `None` once every outbox is gone.
    pub async fn recv(&mut self) -> Option<RoleLifecycleEvent> {
        self.rx.recv().await
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<RoleLifecycleEvent> {
        self.rx.try_recv().ok()
    }
}
