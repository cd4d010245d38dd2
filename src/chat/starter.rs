use crate::api::client::ChatBackend;
use crate::api::models::{InitialQuery, NewChat};
use crate::error::ChatResult;
use log::info;
use uuid::Uuid;

/// Create a conversation and send its opening query.
///
/// Returns the new chat id once both calls succeed, or `Ok(None)` when the
/// query or dish name is blank.
pub async fn start_conversation(backend: &dyn ChatBackend, query: &InitialQuery) -> ChatResult<Option<String>> {
    let title = query.user_query.trim();
    if title.is_empty() || query.dish_name.trim().is_empty() {
        return Ok(None);
    }

    let chat_id = Uuid::new_v4().to_string();
    backend
        .create_chat(&NewChat {
            chat_id: chat_id.clone(),
            title: title.to_string(),
        })
        .await?;
    info!("created chat {chat_id}");

    backend.send_initial(&chat_id, query).await?;
    Ok(Some(chat_id))
}
