pub mod chat_view;
pub mod sidebar;

pub use chat_view::{Body, ChatView, RenderedMessage};
pub use sidebar::Sidebar;
