use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

const TEMP_PREFIX: &str = "temp-";
const LOADING_PREFIX: &str = "loading-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Locally generated id for an optimistic user message.
    pub fn ephemeral() -> Self {
        Self(format!("{TEMP_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn loading() -> Self {
        Self(format!("{LOADING_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_ephemeral(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX) || self.0.starts_with(LOADING_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Transient placeholder, never persisted by the backend.
    Loading,
}

/// One named field of a structured reply, in the order the backend produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    UserQuery(String),
    DishName(String),
    RestaurantName(String),
    SummarizedReviews(Vec<String>),
    Customizations(Vec<String>),
    Ingredients(Vec<String>),
    Beverages(Vec<String>),
    Message(String),
    Extra { key: String, value: Value },
}

impl Section {
    pub fn key(&self) -> &str {
        match self {
            Section::UserQuery(_) => "user_query",
            Section::DishName(_) => "dish_name",
            Section::RestaurantName(_) => "restaurant_name",
            Section::SummarizedReviews(_) => "summarized_reviews",
            Section::Customizations(_) => "customizations",
            Section::Ingredients(_) => "ingredients",
            Section::Beverages(_) => "beverages",
            Section::Message(_) => "message",
            Section::Extra { key, .. } => key,
        }
    }

    fn from_entry(key: String, value: Value) -> Result<Option<Self>, String> {
        if value.is_null() {
            return Ok(None);
        }
        let section = match key.as_str() {
            "user_query" => Section::UserQuery(text(&key, value)?),
            "dish_name" => Section::DishName(text(&key, value)?),
            "restaurant_name" => Section::RestaurantName(text(&key, value)?),
            "message" => Section::Message(text(&key, value)?),
            "summarized_reviews" => Section::SummarizedReviews(list(&key, value)?),
            "customizations" => Section::Customizations(list(&key, value)?),
            "ingredients" => Section::Ingredients(list(&key, value)?),
            "beverages" => Section::Beverages(list(&key, value)?),
            _ => Section::Extra { key, value },
        };
        Ok(Some(section))
    }

    fn to_value(&self) -> Value {
        match self {
            Section::UserQuery(s)
            | Section::DishName(s)
            | Section::RestaurantName(s)
            | Section::Message(s) => Value::String(s.clone()),
            Section::SummarizedReviews(items)
            | Section::Customizations(items)
            | Section::Ingredients(items)
            | Section::Beverages(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            Section::Extra { value, .. } => value.clone(),
        }
    }
}

fn text(key: &str, value: Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(format!("field '{key}' expected text, got {other}")),
    }
}

fn list(key: &str, value: Value) -> Result<Vec<String>, String> {
    match value {
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Ok(other.to_string()),
            })
            .collect(),
        other => Err(format!("field '{key}' expected a list, got {other}")),
    }
}

/// A structured reply: the ordered set of sections the backend sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredContent {
    sections: Vec<Section>,
}

impl StructuredContent {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self::new(vec![Section::UserQuery(text.into())])
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn user_query(&self) -> Option<&str> {
        self.sections.iter().find_map(|s| match s {
            Section::UserQuery(q) => Some(q.as_str()),
            _ => None,
        })
    }
}

impl Serialize for StructuredContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sections.len()))?;
        for section in &self.sections {
            map.serialize_entry(section.key(), &section.to_value())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StructuredContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SectionsVisitor;

        impl<'de> Visitor<'de> for SectionsVisitor {
            type Value = StructuredContent;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of reply sections")
            }

            // Key order is the reveal order, so walk the map as it arrives.
            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut sections = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    if let Some(section) = Section::from_entry(key, value).map_err(de::Error::custom)? {
                        sections.push(section);
                    }
                }
                Ok(StructuredContent { sections })
            }
        }

        deserializer.deserialize_map(SectionsVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(StructuredContent),
}

impl Content {
    pub fn user_query(&self) -> Option<&str> {
        match self {
            Content::Structured(s) => s.user_query(),
            Content::Text(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Content::Structured(_))
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: MessageId,
    #[serde(default)]
    pub chat_id: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub role: Role,
    #[serde(default)]
    pub content: Content,
}

impl Message {
    /// Optimistic user turn carrying `text` as its `user_query`.
    pub fn optimistic_user(chat_id: &str, text: &str) -> Self {
        Self {
            message_id: MessageId::ephemeral(),
            chat_id: chat_id.to_string(),
            created_at: Utc::now(),
            role: Role::User,
            content: Content::Structured(StructuredContent::query(text)),
        }
    }

    pub fn loading(chat_id: &str) -> Self {
        Self {
            message_id: MessageId::loading(),
            chat_id: chat_id.to_string(),
            created_at: Utc::now(),
            role: Role::Loading,
            content: Content::Text("Generating response...".into()),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.role == Role::Loading
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub title: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    pub chat_id: String,
    pub title: String,
}

/// Parameters of the first query that opens a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialQuery {
    pub dish_name: String,
    pub restaurant_name: Option<String>,
    pub location: String,
    pub user_query: String,
    pub limit: u32,
}

impl InitialQuery {
    pub const DEFAULT_LIMIT: u32 = 10;

    pub fn new(dish_name: impl Into<String>, location: impl Into<String>, user_query: impl Into<String>) -> Self {
        Self {
            dish_name: dish_name.into(),
            restaurant_name: None,
            location: location.into(),
            user_query: user_query.into(),
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn with_restaurant(mut self, name: impl Into<String>) -> Self {
        self.restaurant_name = Some(name.into());
        self
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("dish_name", self.dish_name.clone())];
        if let Some(r) = &self.restaurant_name {
            pairs.push(("restaurant_name", r.clone()));
        }
        pairs.push(("location", self.location.clone()));
        pairs.push(("user_query", self.user_query.clone()));
        pairs.push(("limit", self.limit.to_string()));
        pairs
    }
}

/// The backend emits naive UTC datetimes; accept those as well as RFC 3339.
mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("unrecognised timestamp '{raw}'")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}
