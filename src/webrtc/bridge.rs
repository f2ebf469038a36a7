//! Single-slot handoff between a realtime producer and an async consumer.
//!
//! A live source must never wait on a slow consumer, so the slot holds at
//! most one item and a `set` on a full slot evicts the stale item
//! (newest wins). Staleness is bounded to one packet.

use crate::webrtc::packet::{MediaKind, MediaPacket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;

pub struct Bridge<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
    overwritten: AtomicU64,
}

impl<T> Bridge<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            overwritten: AtomicU64::new(0),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<T>> {
        // The slot is a plain Option; a panic elsewhere cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `item`, discarding any item the consumer has not picked up yet.
    ///
    /// Never blocks beyond the slot lock. Items set after `close` are dropped.
    pub fn set(&self, item: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut slot = self.lock_slot();
            if slot.replace(item).is_some() {
                self.overwritten.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.notify.notify_one();
    }

    /// Wait for the next item and take it.
    ///
    /// Returns `None` once the bridge is closed and the slot is empty.
    /// Single consumer.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.lock_slot().take() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Take the pending item without waiting
    pub fn try_get(&self) -> Option<T> {
        self.lock_slot().take()
    }

    /// Close the bridge and wake a pending `get`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of items evicted before the consumer picked them up
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl<T> Default for Bridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The audio and video bridges of one session.
#[derive(Clone)]
pub struct MediaBridges {
    pub video: Arc<Bridge<MediaPacket>>,
    pub audio: Arc<Bridge<MediaPacket>>,
}

impl MediaBridges {
    pub fn new() -> Self {
        Self {
            video: Arc::new(Bridge::new()),
            audio: Arc::new(Bridge::new()),
        }
    }

    pub fn for_kind(&self, kind: MediaKind) -> &Arc<Bridge<MediaPacket>> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn close(&self) {
        self.video.close();
        self.audio.close();
    }
}

impl Default for MediaBridges {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot through which the capture side finds the current session's bridges.
///
/// The session controller installs bridges on start and clears them on stop;
/// sample ingestion looks them up per packet and drops packets while empty.
#[derive(Clone, Default)]
pub struct BridgeSlot {
    inner: Arc<RwLock<Option<MediaBridges>>>,
}

impl BridgeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, bridges: MediaBridges) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(bridges);
    }

    pub fn clear(&self) -> Option<MediaBridges> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn get(&self, kind: MediaKind) -> Option<Arc<Bridge<MediaPacket>>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|bridges| Arc::clone(bridges.for_kind(kind)))
    }

    pub fn is_installed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
