use crate::api::models::{Message, MessageId, Role};
use crate::chat::message_log::MessageLog;
use std::sync::{Arc, Mutex, MutexGuard};

/// Where the send pipeline stands for this conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Submitting {
        user_id: MessageId,
        loading_id: MessageId,
        text: String,
    },
}

/// View-owned state of one open conversation. Not persisted.
#[derive(Debug, Default)]
pub struct ConversationState {
    pub chat_id: String,
    pub log: MessageLog,
    pub pending: Option<MessageId>,
    pub phase: Phase,
    pub error: Option<String>,
    /// Set once the owning view is torn down; results arriving later are dropped.
    pub closed: bool,
}

impl ConversationState {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            ..Self::default()
        }
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.phase, Phase::Submitting { .. })
    }

    /// True for the structured assistant reply the pending id currently names.
    pub fn is_just_arrived(&self, message: &Message) -> bool {
        message.role == Role::Assistant
            && message.content.is_structured()
            && self.pending.as_ref() == Some(&message.message_id)
    }
}

/// Shared handle to a conversation; every mutation happens under the lock.
#[derive(Debug, Clone, Default)]
pub struct SharedConversation(Arc<Mutex<ConversationState>>);

impl SharedConversation {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self(Arc::new(Mutex::new(ConversationState::new(chat_id))))
    }

    pub fn lock(&self) -> MutexGuard<'_, ConversationState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn chat_id(&self) -> String {
        self.lock().chat_id.clone()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().log.messages().to_vec()
    }

    pub fn pending(&self) -> Option<MessageId> {
        self.lock().pending.clone()
    }

    pub fn user_queries(&self) -> Vec<String> {
        self.lock().log.user_queries().map(str::to_string).collect()
    }
}
