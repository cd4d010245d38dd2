//! Debounced persistence of the unsent input text.

use crate::api::events::{emit, ChatEvent, EventSender};
use crate::error::StorageError;
use crate::storage::DurableSlot;
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;

pub const DRAFT_KEY: &str = "chat_draft";

pub struct DraftStore {
    slot: Arc<dyn DurableSlot>,
    key: String,
    quiet: Duration,
    pending: Mutex<Option<AbortHandle>>,
    /// Bumped by every edit and clear; a scheduled write lands only while its
    /// ticket is still current.
    generation: Arc<Mutex<u64>>,
    events: Option<EventSender>,
}

impl DraftStore {
    pub fn new(slot: Arc<dyn DurableSlot>, quiet: Duration) -> Self {
        Self {
            slot,
            key: DRAFT_KEY.to_string(),
            quiet,
            pending: Mutex::new(None),
            generation: Arc::new(Mutex::new(0)),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// The stored draft, if any, to pre-populate the input on mount.
    pub fn restore(&self) -> Option<String> {
        match self.slot.load(&self.key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("could not read draft: {e}");
                None
            }
        }
    }

    /// Schedule `text` to be written once input has been quiet for the
    /// debounce period. A later edit cancels the earlier write.
    ///
    /// Must be called from within a tokio runtime. The write itself runs on
    /// the blocking pool.
    pub fn edit(&self, text: &str) {
        let slot = Arc::clone(&self.slot);
        let key = self.key.clone();
        let value = text.to_string();
        let deadline = tokio::time::Instant::now() + self.quiet;
        let events = self.events.clone();
        let generation = Arc::clone(&self.generation);

        let mut pending = self.lock_pending();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let ticket = {
            let mut current = lock_generation(&generation);
            *current += 1;
            *current
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let chars = value.chars().count();
            let write = tokio::task::spawn_blocking(move || {
                let current = lock_generation(&generation);
                if *current != ticket {
                    return Ok(false);
                }
                slot.store(&key, &value).map(|()| true)
            });
            match write.await {
                Ok(Ok(true)) => {
                    debug!("draft saved ({chars} chars)");
                    if let Some(tx) = &events {
                        emit(tx, ChatEvent::DraftSaved);
                    }
                }
                Ok(Ok(false)) => debug!("draft write superseded"),
                Ok(Err(e)) => warn!("could not save draft: {e}"),
                Err(e) => warn!("draft write did not finish: {e}"),
            }
        });
        *pending = Some(task.abort_handle());
    }

    /// Cancel any scheduled write and delete the stored draft now.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.cancel_pending();
        let mut current = lock_generation(&self.generation);
        *current += 1;
        self.slot.remove(&self.key)
    }

    pub fn has_pending_write(&self) -> bool {
        self.lock_pending().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.lock_pending().take() {
            handle.abort();
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock_generation(generation: &Mutex<u64>) -> MutexGuard<'_, u64> {
    generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for DraftStore {
    fn drop(&mut self) {
        // Text still inside its quiet period is abandoned with the view.
        self.cancel_pending();
    }
}
