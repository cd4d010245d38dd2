use crate::api::models::MessageId;
use tokio::sync::mpsc;

/// Notifications a conversation view pushes to whatever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The message log changed; re-read it.
    MessagesChanged,
    PendingChanged(Option<MessageId>),
    /// A revealing message now shows `visible` sections.
    RevealProgress { message_id: MessageId, visible: usize },
    /// A dismissible error banner.
    Error(String),
    DraftSaved,
}

pub type EventSender = mpsc::UnboundedSender<ChatEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ChatEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Send without caring whether anyone is still listening.
pub fn emit(tx: &EventSender, event: ChatEvent) {
    let _ = tx.send(event);
}
