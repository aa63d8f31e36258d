//! Stream registry — pairs push-endpoint arrivals with RPC stream parameters.
//!
//! Each stream id owns one handoff channel. The push handler sends every
//! HEAD/POST arrival into it via [`StreamRegistry::deliver`]; the RPC
//! parameter decoder claims the receiving end exactly once via
//! [`StreamRegistry::accept`], which waits for the first arrival and turns
//! it into a [`StreamReceiver`]. Whichever side shows up first creates the
//! slot. The slot is removed when the receiver built from it is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StreamError, StreamResult};
use crate::receiver::{Handoff, StreamReceiver};

/// Handoffs buffered per stream before `deliver` has to wait.
const HANDOFF_QUEUE: usize = 1;

type Slots = Arc<Mutex<HashMap<Uuid, Slot>>>;

struct Slot {
    tx: mpsc::Sender<Handoff>,
    rx: Option<mpsc::Receiver<Handoff>>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(HANDOFF_QUEUE);
        Self { tx, rx: Some(rx) }
    }
}

/// Thread-safe map of stream id → handoff channel.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    slots: Slots,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.slots.lock().expect("stream registry lock")
    }

    /// Hand an arrival to whoever claims `id`.
    ///
    /// Completes once a receiver has taken the handoff, not merely once it
    /// is queued. Fails after `wait` if nobody takes it.
    pub async fn deliver(&self, id: Uuid, mut handoff: Handoff, wait: Duration) -> StreamResult<()> {
        let tx = self.slots().entry(id).or_insert_with(Slot::new).tx.clone();
        let taken = handoff.notify_on_take();
        let has_body = handoff.has_body();

        let delivery = async {
            tx.send(handoff)
                .await
                .map_err(|_| StreamError::HandoffRejected(id))?;
            taken.await.map_err(|_| StreamError::HandoffRejected(id))
        };

        let result = match tokio::time::timeout(wait, delivery).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::HandoffTimeout(id)),
        };
        if result.is_err() {
            self.drop_unclaimed(id);
            return result;
        }

        debug!(stream_id = %id, has_body, "handoff taken");
        Ok(())
    }

    /// Forget a slot nobody ever claimed, discarding anything queued in it.
    fn drop_unclaimed(&self, id: Uuid) {
        let mut slots = self.slots();
        if slots.get(&id).is_some_and(|slot| slot.rx.is_some()) {
            slots.remove(&id);
        }
    }

    /// Claim the receiving end of `id`'s channel. At most once per id.
    fn claim(&self, id: Uuid) -> Option<(mpsc::Receiver<Handoff>, SlotGuard)> {
        let rx = self.slots().entry(id).or_insert_with(Slot::new).rx.take()?;
        let guard = SlotGuard {
            slots: Arc::downgrade(&self.slots),
            id,
        };
        Some((rx, guard))
    }

    /// Claim `id` and wait up to `wait` for its first arrival.
    pub async fn accept(&self, id: Uuid, wait: Duration) -> StreamResult<StreamReceiver> {
        let (mut handoffs, guard) = self.claim(id).ok_or(StreamError::AlreadyClaimed(id))?;

        match tokio::time::timeout(wait, handoffs.recv()).await {
            Ok(Some(first)) => {
                debug!(stream_id = %id, has_body = first.has_body(), "stream accepted");
                Ok(StreamReceiver::from_parts(Some(id), first, handoffs, Some(guard)))
            }
            Ok(None) => Err(StreamError::HandoffClosed(id)),
            Err(_) => Err(StreamError::HandoffTimeout(id)),
        }
    }

    /// Number of live stream slots.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }
}

/// Removes a claimed slot from the registry when dropped.
pub(crate) struct SlotGuard {
    slots: Weak<Mutex<HashMap<Uuid, Slot>>>,
    id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            if let Ok(mut slots) = slots.lock() {
                slots.remove(&self.id);
            }
        }
    }
}
