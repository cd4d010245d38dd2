use crate::api::client::ChatBackend;
use crate::api::models::LibraryItem;
use crate::chat::recents::fetch_recents;
use crate::error::ApiError;

/// Navigation list of the most recently created conversations.
#[derive(Debug, Default)]
pub struct Sidebar {
    items: Vec<LibraryItem>,
    limit: usize,
}

impl Sidebar {
    pub fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit,
        }
    }

    pub async fn reload(&mut self, backend: &dyn ChatBackend) -> Result<(), ApiError> {
        self.items = fetch_recents(backend, self.limit).await?;
        Ok(())
    }

    pub fn items(&self) -> &[LibraryItem] {
        &self.items
    }

    pub fn lines(&self) -> Vec<String> {
        if self.items.is_empty() {
            return vec!["No library items yet".into()];
        }
        self.items
            .iter()
            .map(|item| format!("{}  ({})", item.title, item.chat_id))
            .collect()
    }
}
