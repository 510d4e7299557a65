//! Real-time byte pacing.
//!
//! The pacer is the only place in the pipeline that waits on the clock. It
//! reads from whatever upstream the driver hands it and releases the bytes in
//! chunks of 100 ms worth of audio, never faster than the playback rate.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

/// Chunks per second of audio. 10 => each chunk is ~100 ms.
const CHUNKS_PER_SEC: u64 = 10;

/// Playback rate in bytes per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlaybackRate(u64);

impl PlaybackRate {
    /// Zero is clamped to one byte per second; a zero rate would never release.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self(bytes_per_sec.max(1))
    }

    /// Derive a byte rate from an encoded bitrate.
    pub fn from_bits(bits_per_sec: u64, bits_per_byte: u64) -> Self {
        Self::new(bits_per_sec / bits_per_byte.max(1))
    }

    pub fn bytes_per_sec(self) -> u64 {
        self.0
    }

    /// Size of a single released chunk.
    pub fn chunk_bytes(self) -> usize {
        (self.0 / CHUNKS_PER_SEC).max(1) as usize
    }
}

impl std::fmt::Display for PlaybackRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} B/s", self.0)
    }
}

pub struct Pacer {
    rate: PlaybackRate,
    chunk: usize,
    /// Bytes read from upstream but not yet released.
    pending: BytesMut,
    /// Total bytes released so far; with `started` this is the pacing budget.
    released: u64,
    started: Option<Instant>,
    upstream_done: bool,
}

impl Pacer {
    pub fn new(rate: PlaybackRate) -> Self {
        let chunk = rate.chunk_bytes();
        Self {
            rate,
            chunk,
            pending: BytesMut::with_capacity(chunk * 2),
            released: 0,
            started: None,
            upstream_done: false,
        }
    }

    pub fn rate(&self) -> PlaybackRate {
        self.rate
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    /// Earliest instant at which the next chunk may go out.
    fn deadline(&self, started: Instant) -> Instant {
        let nanos = (self.released as u128 * 1_000_000_000) / self.rate.0 as u128;
        started + Duration::from_nanos(nanos as u64)
    }

    /// Pull the next paced chunk out of `upstream`.
    ///
    /// Returns `Ok(None)` once the upstream is exhausted and everything read
    /// from it has been released. Cancel-safe: bytes read before the future
    /// is dropped stay buffered for the next call.
    pub async fn next_chunk<R>(&mut self, upstream: &mut R) -> std::io::Result<Option<Bytes>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        while !self.upstream_done && self.pending.len() < self.chunk {
            self.pending.reserve(self.chunk);
            if upstream.read_buf(&mut self.pending).await? == 0 {
                self.upstream_done = true;
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        tokio::time::sleep_until(self.deadline(started)).await;

        let take = self.pending.len().min(self.chunk);
        let out = self.pending.split_to(take).freeze();
        self.released += out.len() as u64;
        Ok(Some(out))
    }

    /// Prepare to read from a different upstream. Bytes already buffered are
    /// released ahead of the new upstream's bytes, and the pacing budget
    /// (`started`, `released`) carries over, so a swap never releases early.
    pub fn switch_upstream(&mut self) {
        tracing::debug!(released = self.released, pending = self.pending.len(), "pacer upstream switched");
        self.upstream_done = false;
    }

    /// Stop pacing and hand back whatever was buffered but never released.
    ///
    /// The caller decides where those bytes go (normally straight to the
    /// broadcaster, so nothing read from the source is lost on a swap).
    pub fn terminate(self) -> Option<Bytes> {
        tracing::debug!(released = self.released, pending = self.pending.len(), "pacer terminated");
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.freeze())
        }
    }
}
