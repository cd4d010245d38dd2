//! One user submission: optimistic insert, network call, reconcile or revert.
//!
//! ```text
//! Idle --begin--> Submitting --reply--> Resolved --> Idle
//!                            \-error--> Failed   --> Idle
//! ```
//!
//! Only one submission may be outstanding per conversation; a second `begin`
//! while `Submitting` is rejected rather than queued.

use crate::api::client::ChatBackend;
use crate::api::events::{emit, ChatEvent, EventSender};
use crate::api::models::{Message, MessageId, Role};
use crate::chat::conversation::{Phase, SharedConversation};
use crate::chat::draft::DraftStore;
use crate::error::{ApiError, ChatError, ChatResult};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;

pub const PENDING_GRACE: Duration = Duration::from_millis(500);

/// The optimistic pair created by an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub user_id: MessageId,
    pub loading_id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Resolved { reply_id: MessageId },
    /// The response carried no usable reply; nothing was appended and an
    /// error banner is showing.
    NoReply,
}

pub struct SendPipeline {
    backend: Arc<dyn ChatBackend>,
    conversation: SharedConversation,
    drafts: Option<Arc<DraftStore>>,
    events: EventSender,
    grace: Duration,
    grace_timer: Mutex<Option<AbortHandle>>,
}

impl SendPipeline {
    pub fn new(backend: Arc<dyn ChatBackend>, conversation: SharedConversation, events: EventSender) -> Self {
        Self {
            backend,
            conversation,
            drafts: None,
            events,
            grace: PENDING_GRACE,
            grace_timer: Mutex::new(None),
        }
    }

    pub fn with_drafts(mut self, drafts: Arc<DraftStore>) -> Self {
        self.drafts = Some(drafts);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn conversation(&self) -> &SharedConversation {
        &self.conversation
    }

    /// `Idle -> Submitting`. Blank text is a silent no-op (`Ok(None)`).
    pub fn begin(&self, text: &str) -> ChatResult<Option<PendingTurn>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let turn = {
            let mut state = self.conversation.lock();
            if state.closed {
                return Err(ChatError::Closed);
            }
            if state.is_submitting() {
                debug!("rejecting submission while another is outstanding");
                return Err(ChatError::SubmissionInFlight);
            }
            self.cancel_grace_timer();

            let user = Message::optimistic_user(&state.chat_id, text);
            let loading = Message::loading(&state.chat_id);
            let turn = PendingTurn {
                user_id: user.message_id.clone(),
                loading_id: loading.message_id.clone(),
                text: text.to_string(),
            };
            state.log.append_optimistic(user);
            state.log.append_optimistic(loading);
            state.pending = Some(turn.user_id.clone());
            state.phase = Phase::Submitting {
                user_id: turn.user_id.clone(),
                loading_id: turn.loading_id.clone(),
                text: turn.text.clone(),
            };
            state.error = None;
            turn
        };

        emit(&self.events, ChatEvent::MessagesChanged);
        emit(&self.events, ChatEvent::PendingChanged(Some(turn.user_id.clone())));

        if let Some(drafts) = &self.drafts {
            if let Err(e) = drafts.clear() {
                warn!("could not clear draft: {e}");
            }
        }
        Ok(Some(turn))
    }

    /// `Submitting -> Resolved | Failed -> Idle`.
    pub async fn complete(&self, turn: PendingTurn) -> ChatResult<SendOutcome> {
        let chat_id = self.conversation.chat_id();
        info!("sending follow-up in chat {chat_id}");
        let result = self.backend.follow_up(&chat_id, &turn.text).await;
        self.apply(turn, result)
    }

    /// `begin` followed by `complete`.
    pub async fn send(&self, text: &str) -> ChatResult<Option<SendOutcome>> {
        match self.begin(text)? {
            Some(turn) => self.complete(turn).await.map(Some),
            None => Ok(None),
        }
    }

    fn apply(&self, turn: PendingTurn, result: Result<Vec<Message>, ApiError>) -> ChatResult<SendOutcome> {
        let mut state = self.conversation.lock();
        if state.closed {
            debug!("discarding response for closed conversation");
            return Err(ChatError::Closed);
        }
        state.phase = Phase::Idle;

        let reply = result.and_then(|messages| {
            // The backend's copy of this turn, wherever it sits in the response.
            let user_at = messages
                .iter()
                .rposition(|m| m.role == Role::User && m.content.user_query() == Some(turn.text.as_str()));
            if let Some(at) = user_at {
                state.log.confirm(&turn.user_id, messages[at].message_id.clone());
            }
            match messages.last() {
                Some(last) if last.role == Role::Assistant => Ok(last.clone()),
                Some(last) => Err(ApiError::Malformed(format!(
                    "last message {} is not an assistant reply",
                    last.message_id
                ))),
                None => Err(ApiError::Malformed("response carried no messages".into())),
            }
        });

        let mut banner = None;
        let outcome = match reply {
            Ok(reply) => {
                let reply_id = reply.message_id.clone();
                state.log.replace_loading_with_result(&turn.loading_id, Some(reply));
                state.pending = Some(reply_id.clone());
                Ok(SendOutcome::Resolved { reply_id })
            }
            Err(ApiError::Malformed(reason)) => {
                warn!("malformed follow-up response: {reason}");
                state.log.replace_loading_with_result(&turn.loading_id, None);
                state.pending = None;
                banner = Some("Failed to send message: the reply could not be read".to_string());
                Ok(SendOutcome::NoReply)
            }
            Err(e) => {
                error!("follow-up failed: {e}");
                state.log.replace_loading_with_result(&turn.loading_id, None);
                state.pending = None;
                banner = Some(format!("Failed to send message: {e}"));
                Err(ChatError::Api(e))
            }
        };
        state.error = banner.clone();
        let pending = state.pending.clone();
        drop(state);

        emit(&self.events, ChatEvent::MessagesChanged);
        emit(&self.events, ChatEvent::PendingChanged(pending));
        if let Some(banner) = banner {
            emit(&self.events, ChatEvent::Error(banner));
        }
        if let Ok(SendOutcome::Resolved { reply_id }) = &outcome {
            self.schedule_pending_clear(reply_id.clone());
        }
        outcome
    }

    /// Undo an accepted submission whose request was abandoned.
    pub fn abandon(&self, turn: &PendingTurn) {
        let mut state = self.conversation.lock();
        let owns_phase = matches!(&state.phase, Phase::Submitting { user_id, .. } if user_id == &turn.user_id);
        if !owns_phase {
            return;
        }
        state.log.replace_loading_with_result(&turn.loading_id, None);
        if state.pending.as_ref() == Some(&turn.user_id) {
            state.pending = None;
        }
        state.phase = Phase::Idle;
        drop(state);
        emit(&self.events, ChatEvent::MessagesChanged);
        emit(&self.events, ChatEvent::PendingChanged(None));
    }

    fn schedule_pending_clear(&self, reply_id: MessageId) {
        let conversation = self.conversation.clone();
        let events = self.events.clone();
        let deadline = tokio::time::Instant::now() + self.grace;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let cleared = {
                let mut state = conversation.lock();
                if state.pending.as_ref() == Some(&reply_id) {
                    state.pending = None;
                    true
                } else {
                    false
                }
            };
            if cleared {
                debug!("pending {reply_id} cleared after grace delay");
                emit(&events, ChatEvent::PendingChanged(None));
            }
        });
        let mut timer = self.lock_grace();
        if let Some(previous) = timer.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel_grace_timer(&self) {
        if let Some(timer) = self.lock_grace().take() {
            timer.abort();
        }
    }

    fn lock_grace(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.grace_timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SendPipeline {
    fn drop(&mut self) {
        self.cancel_grace_timer();
    }
}
