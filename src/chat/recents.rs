use crate::api::client::ChatBackend;
use crate::api::models::LibraryItem;
use crate::error::ApiError;

pub const RECENTS_LIMIT: usize = 3;

/// Newest first, at most `limit` entries.
pub fn most_recent(mut items: Vec<LibraryItem>, limit: usize) -> Vec<LibraryItem> {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items.truncate(limit);
    items
}

pub async fn fetch_recents(backend: &dyn ChatBackend, limit: usize) -> Result<Vec<LibraryItem>, ApiError> {
    let items = backend.library().await?;
    Ok(most_recent(items, limit))
}
