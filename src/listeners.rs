//! Listener registry.
//!
//! Each connected client gets a bounded channel. The registry keeps the
//! sending half for fan-out; the connection layer drains the receiving half
//! toward the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

/// What a listener channel carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerFrame {
    Chunk(Bytes),
    /// The pipeline stopped. The channel stays open for a later start.
    EndOfStream,
}

/// Receiving half handed to the connection layer.
pub type ListenerChannel = mpsc::Receiver<ListenerFrame>;

#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<HashMap<Uuid, mpsc::Sender<ListenerFrame>>>>,
    capacity: usize,
}

impl ListenerRegistry {
    /// `capacity` is the number of frames a listener may lag behind before
    /// chunks start being dropped for it.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    // The map is never held across an await, so a poisoned lock only means a
    // panic elsewhere mid-insert; the data itself is still consistent.
    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<ListenerFrame>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self) -> (Uuid, ListenerChannel) {
        // One extra slot is kept for `EndOfStream`; chunks never take it.
        let (tx, rx) = mpsc::channel(self.capacity + 1);
        let id = Uuid::new_v4();
        let total = {
            let mut map = self.map();
            map.insert(id, tx);
            map.len()
        };
        tracing::info!(%id, total, "listener registered");
        (id, rx)
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unregister(&self, id: &Uuid) -> bool {
        let removed = self.map().remove(id).is_some();
        if removed {
            tracing::info!(%id, "listener unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.map().contains_key(id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.map().keys().copied().collect()
    }

    /// Drop every sender, ending all listener channels. Returns how many
    /// were closed.
    pub fn close_all(&self) -> usize {
        let closed: Vec<_> = self.map().drain().collect();
        closed.len()
    }

    /// Copy of the current entries. Fan-out iterates this, not the live map,
    /// so removals during a broadcast can't disturb the walk.
    pub(crate) fn snapshot(&self) -> Vec<(Uuid, mpsc::Sender<ListenerFrame>)> {
        self.map().iter().map(|(id, tx)| (*id, tx.clone())).collect()
    }
}
