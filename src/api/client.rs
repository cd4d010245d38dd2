use crate::api::models::{InitialQuery, LibraryItem, Message, NewChat};
use crate::error::ApiError;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// The backend operations the chat engine depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `GET /chat/{chatId}`: the authoritative ordered history.
    async fn history(&self, chat_id: &str) -> Result<Vec<Message>, ApiError>;

    /// `POST /chat/{chatId}/followup-message`: returns the updated history,
    /// whose last element is the new assistant reply.
    async fn follow_up(&self, chat_id: &str, user_query: &str) -> Result<Vec<Message>, ApiError>;

    async fn create_chat(&self, request: &NewChat) -> Result<(), ApiError>;

    async fn send_initial(&self, chat_id: &str, query: &InitialQuery) -> Result<(), ApiError>;

    /// `GET /library`: every known conversation, unordered.
    async fn library(&self) -> Result<Vec<LibraryItem>, ApiError>;
}

pub struct ApiClient {
    pub http: HttpClient,
    pub base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        let trimmed = base_url.trim_end_matches('/');
        Ok(Self {
            http,
            base_url: Url::parse(&format!("{trimmed}/"))?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn check_status(resp: &reqwest::Response, endpoint: &Url) -> Result<(), ApiError> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: resp.status().as_u16(),
                endpoint: endpoint.path().to_string(),
            })
        }
    }
}

/// Pull the `messages` array out of a `{ messages: [...] }` envelope.
///
/// Entries that fail to decode are skipped. Callers that expect a particular
/// last entry must check for it.
pub fn parse_messages(json: Value) -> Result<Vec<Message>, ApiError> {
    let Some(items) = json.get("messages").and_then(|v| v.as_array()) else {
        return Err(ApiError::Malformed("missing 'messages' array".into()));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Message>(item.clone()) {
            Ok(msg) => out.push(msg),
            Err(e) => {
                // One undecodable entry should not blank the whole history.
                warn!("skipping undecodable message: {e}");
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn history(&self, chat_id: &str) -> Result<Vec<Message>, ApiError> {
        let endpoint = self.endpoint(&format!("chat/{chat_id}"))?;
        debug!("GET {endpoint}");
        let resp = self.http.get(endpoint.clone()).send().await?;
        Self::check_status(&resp, &endpoint)?;
        let json: Value = resp.json().await.map_err(|e| ApiError::Malformed(e.to_string()))?;
        parse_messages(json)
    }

    async fn follow_up(&self, chat_id: &str, user_query: &str) -> Result<Vec<Message>, ApiError> {
        let mut endpoint = self.endpoint(&format!("chat/{chat_id}/followup-message"))?;
        endpoint.query_pairs_mut().append_pair("user_query", user_query);
        info!("POST follow-up for chat {chat_id}");
        let resp = self.http.post(endpoint.clone()).send().await?;
        Self::check_status(&resp, &endpoint)?;
        let json: Value = resp.json().await.map_err(|e| ApiError::Malformed(e.to_string()))?;
        parse_messages(json)
    }

    async fn create_chat(&self, request: &NewChat) -> Result<(), ApiError> {
        let endpoint = self.endpoint("chat/new")?;
        info!("POST {endpoint} for chat {}", request.chat_id);
        let resp = self.http.post(endpoint.clone()).json(request).send().await?;
        Self::check_status(&resp, &endpoint)
    }

    async fn send_initial(&self, chat_id: &str, query: &InitialQuery) -> Result<(), ApiError> {
        let mut endpoint = self.endpoint(&format!("chat/{chat_id}/send-message"))?;
        {
            let mut pairs = endpoint.query_pairs_mut();
            for (key, value) in query.query_pairs() {
                pairs.append_pair(key, &value);
            }
        }
        info!("POST initial message for chat {chat_id}");
        let resp = self.http.post(endpoint.clone()).send().await?;
        Self::check_status(&resp, &endpoint)
    }

    async fn library(&self) -> Result<Vec<LibraryItem>, ApiError> {
        let endpoint = self.endpoint("library")?;
        debug!("GET {endpoint}");
        let resp = self.http.get(endpoint.clone()).send().await?;
        Self::check_status(&resp, &endpoint)?;
        let json: Value = resp.json().await.map_err(|e| ApiError::Malformed(e.to_string()))?;
        let list = json
            .as_array()
            .cloned()
            .ok_or_else(|| ApiError::Malformed("library is not an array".into()))?;
        let mut out = Vec::with_capacity(list.len());
        for item in list {
            match serde_json::from_value::<LibraryItem>(item) {
                Ok(entry) => out.push(entry),
                Err(e) => warn!("skipping library entry: {e}"),
            }
        }
        Ok(out)
    }
}
