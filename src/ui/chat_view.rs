use crate::api::client::ChatBackend;
use crate::api::events::{emit, event_channel, ChatEvent, EventReceiver, EventSender};
use crate::api::models::{Content, Message, MessageId, Role, Section};
use crate::app::Settings;
use crate::chat::reveal::visible_sections;
use crate::chat::{DraftStore, PendingTurn, RevealEngine, SendPipeline, SharedConversation};
use crate::error::{ChatError, ChatResult};
use crate::storage::DurableSlot;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Sections { shown: Vec<Section>, total: usize },
    Loading,
}

/// One message as it should be drawn right now.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub message_id: MessageId,
    pub role: Role,
    pub just_arrived: bool,
    pub body: Body,
}

impl RenderedMessage {
    pub fn visible_count(&self) -> usize {
        match &self.body {
            Body::Sections { shown, .. } => shown.len(),
            Body::Text(_) | Body::Loading => 1,
        }
    }

    pub fn to_lines(&self) -> Vec<String> {
        match &self.body {
            Body::Loading => vec!["…".into()],
            Body::Text(text) => vec![text.clone()],
            Body::Sections { shown, .. } if self.role == Role::User => shown
                .iter()
                .find_map(|s| match s {
                    Section::UserQuery(q) => Some(vec![q.clone()]),
                    _ => None,
                })
                .unwrap_or_else(|| vec!["User Query".into()]),
            Body::Sections { shown, .. } => shown.iter().flat_map(section_lines).collect(),
        }
    }
}

fn section_lines(section: &Section) -> Vec<String> {
    fn list(title: &str, items: &[String]) -> Vec<String> {
        let mut out = vec![format!("{title}:")];
        out.extend(items.iter().map(|i| format!("  - {i}")));
        out
    }
    match section {
        Section::UserQuery(q) => vec![q.clone()],
        Section::DishName(d) => vec![format!("# {d}")],
        Section::RestaurantName(r) => vec![format!("Restaurant: {r}")],
        Section::SummarizedReviews(reviews) => match reviews.first() {
            Some(first) => vec!["Reviews:".into(), first.clone()],
            None => Vec::new(),
        },
        Section::Customizations(items) => list("Customizations", items),
        Section::Ingredients(items) => list("Ingredients", items),
        Section::Beverages(items) => list("Beverages", items),
        Section::Message(m) => vec![m.clone()],
        Section::Extra { key, value } => vec![format!("{key}: {value}")],
    }
}

/// Headless view of one open conversation.
///
/// Owns every background task started on the conversation's behalf; dropping
/// the view aborts them and discards any response still in flight.
pub struct ChatView {
    conversation: SharedConversation,
    backend: Arc<dyn ChatBackend>,
    pipeline: Arc<SendPipeline>,
    drafts: Arc<DraftStore>,
    reveal: RevealEngine,
    /// Whether each message has been seen as just arrived since it was first
    /// rendered.
    arrival: HashMap<MessageId, bool>,
    input: String,
    submission: Option<(AbortHandle, PendingTurn)>,
    background: Vec<AbortHandle>,
    events: EventSender,
}

impl ChatView {
    pub fn open(
        backend: Arc<dyn ChatBackend>,
        chat_id: &str,
        slot: Arc<dyn DurableSlot>,
        settings: &Settings,
    ) -> (Self, EventReceiver) {
        let (tx, rx) = event_channel();
        let conversation = SharedConversation::new(chat_id);
        let drafts = Arc::new(DraftStore::new(slot, settings.draft_debounce()).with_events(tx.clone()));
        let pipeline = SendPipeline::new(Arc::clone(&backend), conversation.clone(), tx.clone())
            .with_drafts(Arc::clone(&drafts))
            .with_grace(settings.pending_grace());
        let input = drafts.restore().unwrap_or_default();
        let view = Self {
            conversation,
            backend,
            pipeline: Arc::new(pipeline),
            drafts,
            reveal: RevealEngine::new(settings.reveal_cadence()).with_events(tx.clone()),
            arrival: HashMap::new(),
            input,
            submission: None,
            background: Vec::new(),
            events: tx,
        };
        (view, rx)
    }

    pub fn chat_id(&self) -> String {
        self.conversation.chat_id()
    }

    pub fn conversation(&self) -> &SharedConversation {
        &self.conversation
    }

    /// Fetch the authoritative history and merge it into the log.
    pub async fn load_history(&self) -> ChatResult<()> {
        load_into(&*self.backend, &self.conversation, &self.events).await
    }

    /// Re-fetch history in the background; the task dies with the view.
    pub fn refresh(&mut self) {
        let backend = Arc::clone(&self.backend);
        let conversation = self.conversation.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let _ = load_into(&*backend, &conversation, &events).await;
        });
        self.track(task.abort_handle());
    }

    /// Merge a fresh snapshot every `every`, starting one period from now.
    pub fn start_auto_refresh(&mut self, every: Duration) {
        let backend = Arc::clone(&self.backend);
        let conversation = self.conversation.clone();
        let events = self.events.clone();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let task = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if conversation.lock().closed {
                    break;
                }
                let _ = load_into(&*backend, &conversation, &events).await;
            }
        });
        self.track(task.abort_handle());
    }

    fn track(&mut self, handle: AbortHandle) {
        self.background.retain(|h| !h.is_finished());
        self.background.push(handle);
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn edit(&mut self, text: &str) {
        self.input = text.to_string();
        self.drafts.edit(text);
    }

    /// Submit the current input. Returns `false` if there was nothing to send.
    pub fn submit(&mut self) -> ChatResult<bool> {
        let Some(turn) = self.pipeline.begin(&self.input)? else {
            return Ok(false);
        };
        self.input.clear();

        let pipeline = Arc::clone(&self.pipeline);
        let in_flight = turn.clone();
        let task = tokio::spawn(async move {
            match pipeline.complete(in_flight).await {
                Ok(outcome) => debug!("submission finished: {outcome:?}"),
                Err(ChatError::Closed) => debug!("submission outlived its view"),
                Err(e) => warn!("submission failed: {e}"),
            }
        });
        self.submission = Some((task.abort_handle(), turn));
        Ok(true)
    }

    /// Abort the outstanding submission, if any, and revert its placeholder.
    pub fn cancel_submission(&mut self) {
        if let Some((handle, turn)) = self.submission.take() {
            handle.abort();
            self.pipeline.abandon(&turn);
            info!("cancelled submission {}", turn.user_id);
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.conversation.lock().is_submitting()
    }

    pub fn error(&self) -> Option<String> {
        self.conversation.lock().error.clone()
    }

    pub fn dismiss_error(&self) {
        self.conversation.lock().error = None;
    }

    pub fn user_queries(&self) -> Vec<String> {
        self.conversation.user_queries()
    }

    /// Current visible state of every message, driving the reveal engine.
    pub fn render(&mut self) -> Vec<RenderedMessage> {
        let (messages, flags): (Vec<Message>, Vec<bool>) = {
            let state = self.conversation.lock();
            let messages = state.log.messages().to_vec();
            let flags = messages
                .iter()
                .map(|m| {
                    // Latches on: a reply merged early turns fresh once pending names it.
                    let arrived_now = state.is_just_arrived(m);
                    let latched = self.arrival.entry(m.message_id.clone()).or_insert(arrived_now);
                    *latched |= arrived_now;
                    *latched
                })
                .collect();
            (messages, flags)
        };

        let rendered = messages
            .iter()
            .zip(flags)
            .map(|(message, just_arrived)| {
                let body = match (&message.role, &message.content) {
                    (Role::Loading, _) => Body::Loading,
                    (_, Content::Text(text)) => Body::Text(text.clone()),
                    (_, Content::Structured(s)) => {
                        let visible = self.reveal.observe(message, just_arrived);
                        Body::Sections {
                            shown: visible_sections(message, visible).to_vec(),
                            total: s.len(),
                        }
                    }
                };
                RenderedMessage {
                    message_id: message.message_id.clone(),
                    role: message.role,
                    just_arrived,
                    body,
                }
            })
            .collect();

        let live: Vec<&MessageId> = messages.iter().map(|m| &m.message_id).collect();
        self.reveal.retain_observed(live.iter().copied());
        self.arrival.retain(|id, _| live.contains(&id));
        rendered
    }

    /// Tear the view down: abort network work, timers and reveals.
    pub fn close(&mut self) {
        self.conversation.lock().closed = true;
        if let Some((handle, _)) = self.submission.take() {
            handle.abort();
        }
        for handle in self.background.drain(..) {
            handle.abort();
        }
        self.reveal.clear();
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.close();
    }
}

async fn load_into(backend: &dyn ChatBackend, conversation: &SharedConversation, events: &EventSender) -> ChatResult<()> {
    let chat_id = conversation.chat_id();
    match backend.history(&chat_id).await {
        Ok(messages) => {
            {
                let mut state = conversation.lock();
                if state.closed {
                    return Err(ChatError::Closed);
                }
                state.log.merge_server_snapshot(messages);
            }
            emit(events, ChatEvent::MessagesChanged);
            Ok(())
        }
        Err(e) => {
            error!("failed to load chat history: {e}");
            let banner = "Failed to load chat history. Please try again.".to_string();
            conversation.lock().error = Some(banner.clone());
            emit(events, ChatEvent::Error(banner));
            Err(e.into())
        }
    }
}
