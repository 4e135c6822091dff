//! Conversation history: paginated rows from the backend grouped into threads.

use crate::config::Config;
use crate::error::{JunoError, Result};
use crate::events::{ChatMessage, ChatRow, Conversation, MessageContent, Role};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Envelope of `GET /history/`
#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    results: Vec<ChatRow>,
    #[serde(default)]
    total_pages: u32,
    #[serde(default = "first_page")]
    current_page: u32,
}

fn first_page() -> u32 {
    1
}

/// Body of `GET /conversation/{name}/`
#[derive(Debug, Deserialize)]
struct ConversationRecord {
    id: String,
    #[serde(default)]
    messages: Vec<ChatRow>,
}

/// One page of grouped conversations
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPage {
    pub conversations: Vec<Conversation>,
    pub total_pages: u32,
    pub current_page: u32,
}

impl ConversationPage {
    pub fn empty() -> Self {
        Self {
            conversations: Vec::new(),
            total_pages: 0,
            current_page: 1,
        }
    }
}

/// Expand a row into its user message and, when a reply exists, the assistant message
pub fn row_messages(row: &ChatRow) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        id: format!("user-{}", row.id),
        role: Role::User,
        content: MessageContent::from_text(row.prompt.clone()),
        date_time: row.date_time,
        conversation_name: row.conversation_name.clone(),
    }];

    if let Some(result) = row.result.as_deref().filter(|r| !r.is_empty()) {
        messages.push(ChatMessage {
            id: format!("ai-{}", row.id),
            role: Role::Assistant,
            content: MessageContent::from_text(result),
            date_time: row.date_time,
            conversation_name: row.conversation_name.clone(),
        });
    }

    messages
}

/// Group flat rows into conversations.
///
/// Messages inside a conversation are sorted by timestamp with a stable sort,
/// so a row's user message always precedes its reply. Conversations come back
/// most recently active first.
pub fn group_rows(rows: &[ChatRow]) -> Vec<Conversation> {
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: HashMap<&str, Vec<ChatMessage>> = HashMap::new();

    for row in rows {
        let name = row.conversation_name.as_str();
        let entry = grouped.entry(name).or_insert_with(|| {
            order.push(name);
            Vec::new()
        });
        entry.extend(row_messages(row));
    }

    let mut conversations: Vec<Conversation> = order
        .into_iter()
        .filter_map(|name| {
            let mut messages = grouped.remove(name)?;
            messages.sort_by_key(|m| m.date_time);
            let last_message_time = messages.last()?.date_time;
            Some(Conversation {
                id: name.to_string(),
                messages,
                last_message_time,
            })
        })
        .collect();

    conversations.sort_by(|a, b| {
        b.last_message_time
            .cmp(&a.last_message_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    conversations
}

/// Build a conversation from the rows of a single-conversation response
fn conversation_from_rows(id: String, rows: &[ChatRow]) -> Conversation {
    let mut messages: Vec<ChatMessage> = rows.iter().flat_map(row_messages).collect();
    messages.sort_by_key(|m| m.date_time);
    let last_message_time = messages
        .last()
        .map(|m| m.date_time)
        .unwrap_or_default();
    Conversation {
        id,
        messages,
        last_message_time,
    }
}

/// HTTP client for the history endpoints
#[derive(Clone)]
pub struct HistoryClient {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl HistoryClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            page_size: config.page_size,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| JunoError::Config(format!("invalid backend url '{}': {e}", self.base_url)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| JunoError::Config(format!("backend url '{}' cannot be a base", self.base_url)))?;
            path.pop_if_empty();
            path.extend(segments);
            // trailing slash, the backend routes end with one
            path.push("");
        }
        Ok(url)
    }

    /// Fetch and group one page, reporting any failure
    pub async fn try_fetch_page(&self, page: u32) -> Result<ConversationPage> {
        let mut url = self.endpoint(&["history"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &self.page_size.to_string());

        tracing::debug!(%url, "fetching history page");
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(JunoError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        let envelope: HistoryEnvelope = serde_json::from_slice(&bytes)?;

        Ok(ConversationPage {
            conversations: group_rows(&envelope.results),
            total_pages: envelope.total_pages,
            current_page: envelope.current_page,
        })
    }

    /// Fetch one page; any failure degrades to an empty page
    pub async fn fetch_page(&self, page: u32) -> ConversationPage {
        match self.try_fetch_page(page).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(page, error = %e, "history fetch failed");
                ConversationPage::empty()
            }
        }
    }

    /// Fetch a single conversation by name; a 404 is [`JunoError::NotFound`]
    pub async fn fetch_conversation(&self, name: &str) -> Result<Conversation> {
        let url = self.endpoint(&["conversation", name])?;

        tracing::debug!(%url, "fetching conversation");
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(JunoError::NotFound {
                    name: name.to_string(),
                });
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(JunoError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let bytes = response.bytes().await?;
        let record: ConversationRecord = serde_json::from_slice(&bytes)?;
        Ok(conversation_from_rows(record.id, &record.messages))
    }
}

/// Paged history list with search, accumulating conversations across pages
pub struct HistoryBrowser {
    client: HistoryClient,
    conversations: Vec<Conversation>,
    current_page: u32,
    total_pages: u32,
    is_loading: bool,
    load_error: Option<String>,
}

impl HistoryBrowser {
    pub fn new(client: HistoryClient) -> Self {
        Self {
            client,
            conversations: Vec::new(),
            current_page: 1,
            total_pages: 1,
            is_loading: false,
            load_error: None,
        }
    }

    /// Replace the list with page 1
    pub async fn load_first(&mut self) -> bool {
        self.load(1).await
    }

    /// Append the next page if there is one and nothing is in flight
    pub async fn load_more(&mut self) -> bool {
        if self.is_loading || !self.has_more() {
            return false;
        }
        self.load(self.current_page + 1).await
    }

    async fn load(&mut self, page: u32) -> bool {
        self.is_loading = true;
        self.load_error = None;

        let loaded = match self.client.try_fetch_page(page).await {
            Ok(result) => {
                if page == 1 {
                    self.conversations = result.conversations;
                } else {
                    self.conversations.extend(result.conversations);
                }
                self.total_pages = result.total_pages;
                self.current_page = result.current_page;
                true
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "history load failed");
                self.load_error = Some("Failed to load chat history. Please try again.".to_string());
                false
            }
        };

        self.is_loading = false;
        loaded
    }

    pub fn has_more(&self) -> bool {
        self.current_page < self.total_pages
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Conversations whose name contains `query`, case-insensitively
    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        let query = query.to_lowercase();
        self.conversations
            .iter()
            .filter(|c| c.id.to_lowercase().contains(&query))
            .collect()
    }
}
