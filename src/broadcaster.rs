//! Best-effort fan-out of paced chunks to every registered listener.

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;

use crate::listeners::{ListenerFrame, ListenerRegistry};

/// Outcome of one fan-out pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Listener was alive but its channel was full; it misses this frame.
    pub dropped: usize,
    /// Listener had gone away and was removed from the registry.
    pub pruned: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    listeners: ListenerRegistry,
}

impl Broadcaster {
    pub fn new(listeners: ListenerRegistry) -> Self {
        Self { listeners }
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn broadcast(&self, chunk: Bytes) -> DeliveryReport {
        self.fan_out(ListenerFrame::Chunk(chunk))
    }

    /// Tell every listener the stream ended, without closing anything.
    pub fn end_of_stream(&self) -> DeliveryReport {
        self.fan_out(ListenerFrame::EndOfStream)
    }

    fn fan_out(&self, frame: ListenerFrame) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let is_chunk = matches!(frame, ListenerFrame::Chunk(_));

        // Walk a snapshot; pruning mutates the live map only.
        for (id, tx) in self.listeners.snapshot() {
            if tx.is_closed() {
                self.listeners.unregister(&id);
                report.pruned += 1;
                continue;
            }
            // The last slot of every channel belongs to end-of-stream.
            if is_chunk && tx.capacity() <= 1 {
                tracing::debug!(%id, "listener lagging; frame dropped");
                report.dropped += 1;
                continue;
            }
            // Never await a listener: a slow client must not hold up the pacer.
            match tx.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) if !is_chunk => {
                    // Only end-of-stream can fill the reserved slot, so the
                    // newest frame queued for this listener already is one.
                    tracing::debug!(%id, "end of stream already queued");
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(%id, "listener lagging; frame dropped");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    self.listeners.unregister(&id);
                    report.pruned += 1;
                }
            }
        }

        if report.pruned > 0 {
            tracing::info!(pruned = report.pruned, remaining = self.listeners.len(), "pruned closed listeners");
        }
        report
    }
}
