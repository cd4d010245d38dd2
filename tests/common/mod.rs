#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use dishchat::api::client::{parse_messages, ChatBackend};
use dishchat::api::models::{
    Content, InitialQuery, LibraryItem, Message, MessageId, NewChat, Role, Section, StructuredContent,
};
use dishchat::app::Settings;
use dishchat::error::ApiError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub enum Reply {
    Transport,
    Status(u16),
    Malformed,
    /// The turn is already in the history; answer with the history as is.
    Committed,
    /// A raw response body, decoded the way the HTTP client decodes it.
    Wire(String),
}

/// In-memory stand-in for the backend: keeps a history per (single) chat and
/// answers follow-ups the way the real service does, appending the user turn
/// and an assistant reply and returning the whole history.
#[derive(Default)]
pub struct FakeBackend {
    pub history: Mutex<Vec<Message>>,
    pub scripted: Mutex<VecDeque<Reply>>,
    pub follow_up_calls: Mutex<Vec<String>>,
    pub history_calls: AtomicUsize,
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub created: Mutex<Vec<NewChat>>,
    pub initial: Mutex<Vec<(String, InitialQuery)>>,
    pub fail_create: AtomicBool,
    pub library: Mutex<Vec<LibraryItem>>,
    turns: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_history(messages: Vec<Message>) -> Arc<Self> {
        let backend = Self::default();
        *backend.history.lock().unwrap() = messages;
        Arc::new(backend)
    }

    pub fn script(&self, reply: Reply) {
        self.scripted.lock().unwrap().push_back(reply);
    }

    /// Hold follow-up responses until the returned notifier fires.
    pub fn hold_replies(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn follow_up_count(&self) -> usize {
        self.follow_up_calls.lock().unwrap().len()
    }

    pub fn server_history(&self) -> Vec<Message> {
        self.history.lock().unwrap().clone()
    }
}

pub fn message(id: &str, role: Role, content: Content) -> Message {
    Message {
        message_id: MessageId::from(id),
        chat_id: "chat-1".into(),
        created_at: Utc::now(),
        role,
        content,
    }
}

pub fn user_turn(id: &str, query: &str) -> Message {
    message(id, Role::User, Content::Structured(StructuredContent::query(query)))
}

pub fn assistant_reply(id: &str, query: &str) -> Message {
    message(
        id,
        Role::Assistant,
        Content::Structured(StructuredContent::new(vec![
            Section::UserQuery(query.to_string()),
            Section::DishName("Mapo Tofu".into()),
            Section::SummarizedReviews(vec!["Numbing, hot and worth it.".into()]),
        ])),
    )
}

pub async fn transport_error() -> ApiError {
    // A request that cannot be built fails without touching the network.
    match reqwest::get("not a url").await {
        Err(e) => ApiError::Transport(e),
        Ok(_) => ApiError::Malformed("unexpected response".into()),
    }
}

pub fn decode_wire(body: &str) -> Result<Vec<Message>, ApiError> {
    let json = serde_json::from_str(body).map_err(|e| ApiError::Malformed(e.to_string()))?;
    parse_messages(json)
}

pub fn settings() -> Settings {
    Settings::default()
}

/// Let spawned tasks run to their next suspension point.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn history(&self, _chat_id: &str) -> Result<Vec<Message>, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.server_history())
    }

    async fn follow_up(&self, _chat_id: &str, user_query: &str) -> Result<Vec<Message>, ApiError> {
        self.follow_up_calls.lock().unwrap().push(user_query.to_string());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self.scripted.lock().unwrap().pop_front();
        match scripted {
            Some(Reply::Transport) => return Err(transport_error().await),
            Some(Reply::Status(status)) => {
                return Err(ApiError::Status {
                    status,
                    endpoint: "/chat/chat-1/followup-message".into(),
                });
            }
            Some(Reply::Malformed) => return Err(ApiError::Malformed("missing 'messages' array".into())),
            Some(Reply::Committed) => return Ok(self.server_history()),
            Some(Reply::Wire(body)) => return decode_wire(&body),
            None => {}
        }

        let n = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        let mut history = self.history.lock().unwrap();
        history.push(user_turn(&format!("srv-u{n}"), user_query));
        history.push(assistant_reply(&format!("srv-a{n}"), user_query));
        Ok(history.clone())
    }

    async fn create_chat(&self, request: &NewChat) -> Result<(), ApiError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 400,
                endpoint: "/chat/new".into(),
            });
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn send_initial(&self, chat_id: &str, query: &InitialQuery) -> Result<(), ApiError> {
        self.initial.lock().unwrap().push((chat_id.to_string(), query.clone()));
        Ok(())
    }

    async fn library(&self) -> Result<Vec<LibraryItem>, ApiError> {
        Ok(self.library.lock().unwrap().clone())
    }
}
