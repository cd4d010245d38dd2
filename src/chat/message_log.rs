//! Ordered message log for one conversation.
//!
//! The log takes two kinds of writes: optimistic local inserts made while a
//! request is outstanding, and authoritative snapshots from the backend. Every
//! write is a single `&mut self` call, so a renderer holding the log behind a
//! lock never observes a half-applied change.

use crate::api::models::{Content, Message, MessageId, Role};
use log::debug;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    entries: Vec<Message>,
    /// Ephemeral id -> id the backend assigned to the same turn.
    superseded: HashMap<MessageId, MessageId>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            entries: messages,
            superseded: HashMap::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.iter().any(|m| &m.message_id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.entries.iter().find(|m| &m.message_id == id)
    }

    pub fn append_optimistic(&mut self, message: Message) {
        debug!("optimistic insert {} ({:?})", message.message_id, message.role);
        self.entries.push(message);
    }

    /// Remove the placeholder `loading_id` and, in the same step, append
    /// `result` unless a message with its id is already present.
    ///
    /// Returns `true` if the placeholder was found.
    pub fn replace_loading_with_result(&mut self, loading_id: &MessageId, result: Option<Message>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|m| &m.message_id != loading_id);
        let removed = self.entries.len() != before;
        if let Some(msg) = result {
            if self.contains(&msg.message_id) {
                debug!("reply {} already present, not appending", msg.message_id);
            } else {
                self.entries.push(msg);
            }
        }
        removed
    }

    /// Record that the optimistic entry `ephemeral` is the turn the backend
    /// knows as `confirmed`, re-keying it in place.
    pub fn confirm(&mut self, ephemeral: &MessageId, confirmed: MessageId) {
        if ephemeral == &confirmed {
            return;
        }
        if self.contains(&confirmed) {
            // Backend copy already merged; the optimistic copy is a duplicate.
            self.entries.retain(|m| &m.message_id != ephemeral);
        } else if let Some(entry) = self.entries.iter_mut().find(|m| &m.message_id == ephemeral) {
            entry.message_id = confirmed.clone();
        }
        debug!("confirmed {ephemeral} as {confirmed}");
        self.superseded.insert(ephemeral.clone(), confirmed);
    }

    /// Map an ephemeral id to its confirmed id, if one is known.
    pub fn resolve_id<'a>(&'a self, id: &'a MessageId) -> &'a MessageId {
        self.superseded.get(id).unwrap_or(id)
    }

    pub fn is_superseded(&self, id: &MessageId) -> bool {
        self.superseded.contains_key(id)
    }

    /// Replace the log with the backend's ordered history.
    ///
    /// Snapshot entries win. A local entry the snapshot does not know is kept,
    /// after the snapshot and in its original relative order, unless its id
    /// has been superseded by a confirmed id. Applying the same snapshot twice
    /// yields the same log as applying it once.
    pub fn merge_server_snapshot(&mut self, server: Vec<Message>) {
        let server_ids: HashSet<&MessageId> = server.iter().map(|m| &m.message_id).collect();
        let survivors: Vec<Message> = self
            .entries
            .iter()
            .filter(|m| !server_ids.contains(&m.message_id) && !self.superseded.contains_key(&m.message_id))
            .cloned()
            .collect();
        debug!(
            "merging snapshot of {} messages, keeping {} local",
            server.len(),
            survivors.len()
        );

        let mut merged = Vec::with_capacity(server.len() + survivors.len());
        let mut seen = HashSet::with_capacity(server.len());
        for msg in server {
            if seen.insert(msg.message_id.clone()) {
                merged.push(msg);
            }
        }
        merged.extend(survivors);
        self.entries = merged;
    }

    /// The `user_query` of every structured user turn, in log order.
    ///
    /// The iterator borrows the log and is `Clone`, so it can be restarted.
    pub fn user_queries(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.entries
            .iter()
            .filter(|m| m.role == Role::User)
            .filter_map(|m| match &m.content {
                Content::Structured(s) => s.user_query(),
                Content::Text(_) => None,
            })
            .filter(|q| !q.is_empty())
    }

    pub fn loading_count(&self) -> usize {
        self.entries.iter().filter(|m| m.is_loading()).count()
    }
}
