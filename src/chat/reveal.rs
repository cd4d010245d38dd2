//! Staged disclosure of structured replies.
//!
//! A freshly arrived structured reply shows its first section at once and one
//! more section per cadence interval. Everything else (history, plain text)
//! is shown whole. Visibility is derived from the schedule's start instant, so
//! it reads the same whether or not the notifier task has run.

use crate::api::events::{emit, ChatEvent, EventSender};
use crate::api::models::{Content, Message, MessageId, Section};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct RevealSchedule {
    total: usize,
    started: Instant,
    cadence: Duration,
    animated: bool,
}

impl RevealSchedule {
    pub fn new(total: usize, cadence: Duration, animated: bool) -> Self {
        Self {
            total,
            started: Instant::now(),
            cadence,
            animated,
        }
    }

    pub fn visible_at(&self, now: Instant) -> usize {
        if !self.animated || self.total == 0 || self.cadence.is_zero() {
            return self.total;
        }
        let elapsed = now.saturating_duration_since(self.started);
        let steps = (elapsed.as_millis() / self.cadence.as_millis().max(1)) as usize;
        (steps + 1).min(self.total)
    }

    /// Instant at which `count` sections become visible.
    fn due(&self, count: usize) -> Instant {
        self.started + self.cadence * (count.saturating_sub(1) as u32)
    }
}

/// The reveal of one observed message. Dropping it cancels any pending tick.
#[derive(Debug)]
pub struct RevealHandle {
    just_arrived: bool,
    schedule: RevealSchedule,
    ticker: Option<AbortHandle>,
}

impl RevealHandle {
    fn start(message: &Message, just_arrived: bool, cadence: Duration, events: Option<&EventSender>) -> Self {
        let (total, animated) = match &message.content {
            Content::Structured(s) => (s.len(), just_arrived),
            Content::Text(_) => (1, false),
        };
        let schedule = RevealSchedule::new(total, cadence, animated);
        let ticker = match events {
            Some(tx) if animated && total > 1 => Some(spawn_ticker(message.message_id.clone(), schedule, tx.clone())),
            _ => None,
        };
        Self {
            just_arrived,
            schedule,
            ticker,
        }
    }

    pub fn visible(&self) -> usize {
        self.schedule.visible_at(Instant::now())
    }

    pub fn cancel(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for RevealHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn spawn_ticker(message_id: MessageId, schedule: RevealSchedule, tx: EventSender) -> AbortHandle {
    let task = tokio::spawn(async move {
        for count in 2..=schedule.total {
            tokio::time::sleep_until(schedule.due(count)).await;
            emit(
                &tx,
                ChatEvent::RevealProgress {
                    message_id: message_id.clone(),
                    visible: count,
                },
            );
        }
    });
    task.abort_handle()
}

/// Tracks one reveal per observed message.
#[derive(Debug, Default)]
pub struct RevealEngine {
    cadence: Duration,
    events: Option<EventSender>,
    handles: HashMap<MessageId, RevealHandle>,
}

impl RevealEngine {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            events: None,
            handles: HashMap::new(),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Observe `message` with the given flag and return how many of its
    /// sections are visible. A changed flag restarts the reveal.
    pub fn observe(&mut self, message: &Message, just_arrived: bool) -> usize {
        let id = &message.message_id;
        if let Some(handle) = self.handles.get(id) {
            if handle.just_arrived == just_arrived {
                return handle.visible();
            }
            debug!("restarting reveal of {id}");
        }
        let handle = RevealHandle::start(message, just_arrived, self.cadence, self.events.as_ref());
        let visible = handle.visible();
        // Inserting drops, and so cancels, any previous handle for this id.
        self.handles.insert(id.clone(), handle);
        visible
    }

    /// Drop reveals of messages no longer being observed.
    pub fn retain_observed<'a>(&mut self, live: impl IntoIterator<Item = &'a MessageId>) {
        let live: HashSet<&MessageId> = live.into_iter().collect();
        self.handles.retain(|id, _| live.contains(id));
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub fn is_observing(&self, id: &MessageId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn active_tickers(&self) -> usize {
        self.handles
            .values()
            .filter(|h| h.ticker.as_ref().is_some_and(|t| !t.is_finished()))
            .count()
    }
}

/// The sections of `message` among the first `visible`.
pub fn visible_sections(message: &Message, visible: usize) -> &[Section] {
    match &message.content {
        Content::Structured(s) => {
            let sections = s.sections();
            &sections[..visible.min(sections.len())]
        }
        Content::Text(_) => &[],
    }
}
