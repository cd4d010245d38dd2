pub mod conversation;
pub mod draft;
pub mod message_log;
pub mod pipeline;
pub mod recents;
pub mod reveal;
pub mod starter;

pub use conversation::{ConversationState, Phase, SharedConversation};
pub use draft::DraftStore;
pub use message_log::MessageLog;
pub use pipeline::{PendingTurn, SendOutcome, SendPipeline};
pub use reveal::RevealEngine;
