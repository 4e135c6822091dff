use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Author of a chat message
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A reference to content by URL (remote or `data:` URL)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRef {
    pub url: String,
}

/// A file carried inline as a data URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub name: String,
}

/// One typed piece of a multi-modal message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: UrlRef,
    },
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
    FileUrl {
        file_url: FileRef,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message body: either a bare string or a list of typed parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Single text part, the shape used for synthesized and streamed messages.
    pub fn from_text(text: impl Into<String>) -> Self {
        MessageContent::Parts(vec![ContentPart::text(text)])
    }

    /// Text parts joined by a single space; non-text parts are skipped.
    pub fn plain_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.trim().is_empty(),
            MessageContent::Parts(parts) => parts.iter().all(|p| match p {
                ContentPart::Text { text } => text.trim().is_empty(),
                _ => false,
            }),
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    pub date_time: DateTime<Utc>,
    pub conversation_name: String,
}

impl ChatMessage {
    pub fn new(
        role: Role,
        content: MessageContent,
        conversation_name: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            date_time: Utc::now(),
            conversation_name: conversation_name.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Flat history row as stored by the backend: one prompt and its optional reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRow {
    pub id: i64,
    pub conversation_name: String,
    pub prompt: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(deserialize_with = "deserialize_row_time")]
    pub date_time: DateTime<Utc>,
}

/// Parse a row timestamp; values without an offset are taken as UTC
pub fn parse_row_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_row_time<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_row_time(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid date_time '{raw}'")))
}

/// A named, timestamp-ordered thread of messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub last_message_time: DateTime<Utc>,
}

/// Event decoded from one `data:` line of the chat stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta {
        #[serde(default)]
        text: String,
    },
    ToolCall {
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Done,
    /// Event types this client does not know about
    #[serde(other)]
    Unknown,
}

/// Events delivered to the consumer of a chat stream
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Incremental text fragment (not the accumulated reply)
    Delta(String),
    /// The backend invoked a tool on our behalf
    ToolCall {
        name: String,
        args: serde_json::Value,
    },
    /// Stream finished; carries the full accumulated reply
    Complete { text: String },
    /// Stream failed, either reported by the backend or at transport level
    Error(String),
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::Complete { .. } | ChatEvent::Error(_))
    }
}
