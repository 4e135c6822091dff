//! One open conversation: its messages, the in-flight reply and the tool status line.
//!
//! A send pushes the user message plus an empty assistant placeholder, then the
//! placeholder is rewritten in place as stream events arrive. Only one stream
//! runs per session; attaching a new one cancels the old.

use crate::events::{ChatEvent, ChatMessage, ContentPart, Conversation, MessageContent, Role};
use crate::stream::{StreamHandle, StreamRequest};

pub const ERROR_REPLY_PREFIX: &str = "Sorry, an error occurred: ";

/// What the caller needs to open a stream after [`ChatSession::begin_send`]
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub request: StreamRequest,
    pub user_message_id: String,
    pub assistant_message_id: String,
}

pub struct ChatSession {
    name: String,
    messages: Vec<ChatMessage>,
    loading: bool,
    tool_status: Option<String>,
    placeholder_id: Option<String>,
    reply: String,
    stream: Option<StreamHandle>,
}

impl ChatSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
            loading: false,
            tool_status: None,
            placeholder_id: None,
            reply: String::new(),
            stream: None,
        }
    }

    pub fn from_conversation(conversation: Conversation) -> Self {
        let mut session = Self::new(conversation.id);
        session.messages = conversation.messages;
        session
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn tool_status(&self) -> Option<&str> {
        self.tool_status.as_deref()
    }

    /// Replace the message with the same id, or append it
    pub fn upsert(&mut self, message: ChatMessage) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
    }

    /// Record a user turn and build the request for it.
    ///
    /// Returns `None` when there is nothing to send or a reply is still loading.
    pub fn begin_send(&mut self, parts: Vec<ContentPart>) -> Option<PendingSend> {
        let content = MessageContent::Parts(parts);
        if content.is_empty() || self.loading {
            return None;
        }

        let user = ChatMessage::new(Role::User, content, self.name.as_str());
        let placeholder = ChatMessage::new(Role::Assistant, MessageContent::from_text(""), self.name.as_str());
        let user_message_id = user.id.clone();
        let assistant_message_id = placeholder.id.clone();

        self.upsert(user);
        let request = StreamRequest::from_history(&self.messages, self.name.as_str());
        self.upsert(placeholder);

        self.loading = true;
        self.tool_status = None;
        self.reply.clear();
        self.placeholder_id = Some(assistant_message_id.clone());

        tracing::debug!(
            conversation = %self.name,
            history = request.messages.len(),
            "send started"
        );

        Some(PendingSend {
            request,
            user_message_id,
            assistant_message_id,
        })
    }

    /// Take ownership of the stream feeding the current placeholder
    pub fn attach(&mut self, handle: StreamHandle) {
        if let Some(mut previous) = self.stream.replace(handle) {
            tracing::debug!(conversation = %self.name, "cancelling previous stream");
            previous.cancel();
        }
    }

    /// Stop the running stream, keeping whatever text arrived so far
    pub fn cancel(&mut self) {
        if let Some(mut handle) = self.stream.take() {
            handle.cancel();
        }
        self.finish();
    }

    /// Fold one stream event into the session state
    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Delta(fragment) => {
                self.reply.push_str(fragment);
                let text = self.reply.clone();
                self.set_placeholder_text(text);
            }
            ChatEvent::ToolCall { name, args } => {
                let status = match args.get("query").and_then(|q| q.as_str()) {
                    Some(query) => format!("Searching for: {query}"),
                    None => format!("Running {name}"),
                };
                self.tool_status = Some(status);
            }
            ChatEvent::Complete { text } => {
                self.set_placeholder_text(text.clone());
                self.finish();
            }
            ChatEvent::Error(message) => {
                tracing::warn!(conversation = %self.name, error = %message, "reply failed");
                self.set_placeholder_text(format!("{ERROR_REPLY_PREFIX}{message}"));
                self.finish();
            }
        }
    }

    /// Wait for the next event of the attached stream and apply it.
    ///
    /// Returns `None` once no stream is attached or it has ended.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        let handle = self.stream.as_mut()?;
        match handle.recv().await {
            Some(event) => {
                self.apply(&event);
                if event.is_terminal() {
                    self.stream = None;
                }
                Some(event)
            }
            None => {
                // sender dropped without a terminal event
                self.stream = None;
                if self.loading {
                    self.finish();
                }
                None
            }
        }
    }

    /// Text of the latest assistant reply, the input for text-to-speech
    pub fn speakable_text(&self) -> Option<String> {
        let last = self.messages.last()?;
        if last.role != Role::Assistant {
            return None;
        }
        let text = last.content.plain_text();
        (!text.is_empty()).then_some(text)
    }

    fn set_placeholder_text(&mut self, text: String) {
        let Some(id) = self.placeholder_id.as_deref() else {
            return;
        };
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.content = MessageContent::from_text(text);
        }
    }

    fn finish(&mut self) {
        self.loading = false;
        self.tool_status = None;
        self.placeholder_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UrlRef;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn placeholder_text(session: &ChatSession, id: &str) -> String {
        session
            .messages()
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.content.plain_text())
            .unwrap_or_default()
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut session = ChatSession::new("c1");
        let mut message = ChatMessage::new(Role::User, MessageContent::from_text("hi"), "c1");
        session.upsert(message.clone());
        message.content = MessageContent::from_text("hello");
        session.upsert(message);

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].content.plain_text(), "hello");
    }

    #[test]
    fn begin_send_ignores_blank_input_and_concurrent_sends() {
        let mut session = ChatSession::new("c1");
        assert!(session.begin_send(vec![ContentPart::text("   ")]).is_none());
        assert!(session.begin_send(Vec::new()).is_none());

        assert!(session.begin_send(vec![ContentPart::text("first")]).is_some());
        assert!(session.begin_send(vec![ContentPart::text("second")]).is_none());
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn request_excludes_the_placeholder() {
        let mut session = ChatSession::new("c1");
        let image = ContentPart::ImageUrl {
            image_url: UrlRef {
                url: "data:image/png;base64,AAAA".into(),
            },
        };
        let pending = session
            .begin_send(vec![ContentPart::text("what is this"), image])
            .unwrap();

        assert_eq!(pending.request.conversation_name, "c1");
        assert_eq!(pending.request.messages.len(), 1);
        assert_eq!(pending.request.messages[0].role, Role::User);
        assert_eq!(session.messages().len(), 2);
        assert!(session.is_loading());
    }

    #[test]
    fn deltas_tool_status_and_completion() {
        let mut session = ChatSession::new("c1");
        let pending = session.begin_send(vec![ContentPart::text("weather?")]).unwrap();
        let id = pending.assistant_message_id;

        session.apply(&ChatEvent::ToolCall {
            name: "search".into(),
            args: json!({"query": "weather today"}),
        });
        assert_eq!(session.tool_status(), Some("Searching for: weather today"));

        session.apply(&ChatEvent::Delta("Sunny".into()));
        session.apply(&ChatEvent::Delta(" and warm".into()));
        assert_eq!(placeholder_text(&session, &id), "Sunny and warm");
        assert!(session.is_loading());

        session.apply(&ChatEvent::Complete {
            text: "Sunny and warm".into(),
        });
        assert!(!session.is_loading());
        assert_eq!(session.tool_status(), None);
        assert_eq!(session.speakable_text().as_deref(), Some("Sunny and warm"));
    }

    #[test]
    fn error_replaces_placeholder_text() {
        let mut session = ChatSession::new("c1");
        let pending = session.begin_send(vec![ContentPart::text("hi")]).unwrap();
        session.apply(&ChatEvent::Delta("partial".into()));
        session.apply(&ChatEvent::Error("HTTP 500".into()));

        assert_eq!(
            placeholder_text(&session, &pending.assistant_message_id),
            "Sorry, an error occurred: HTTP 500"
        );
        assert!(!session.is_loading());
        assert!(session.begin_send(vec![ContentPart::text("retry")]).is_some());
    }

    #[test]
    fn speakable_text_only_for_trailing_assistant_message() {
        let mut session = ChatSession::new("c1");
        session.upsert(ChatMessage::new(Role::User, MessageContent::from_text("hi"), "c1"));
        assert_eq!(session.speakable_text(), None);

        session.upsert(ChatMessage::new(
            Role::Assistant,
            MessageContent::Parts(vec![ContentPart::text("Hello"), ContentPart::text("there")]),
            "c1",
        ));
        assert_eq!(session.speakable_text().as_deref(), Some("Hello there"));
    }

    #[tokio::test]
    async fn next_event_drives_attached_stream() {
        let mut session = ChatSession::new("c1");
        let pending = session.begin_send(vec![ContentPart::text("hi")]).unwrap();

        let (tx, rx) = mpsc::channel(8);
        session.attach(StreamHandle::new(rx, CancellationToken::new()));
        tx.send(ChatEvent::Delta("Hel".into())).await.unwrap();
        tx.send(ChatEvent::Delta("lo".into())).await.unwrap();
        tx.send(ChatEvent::Complete { text: "Hello".into() }).await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = session.next_event().await {
            seen.push(event);
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(placeholder_text(&session, &pending.assistant_message_id), "Hello");
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn attaching_cancels_previous_stream() {
        let mut session = ChatSession::new("c1");
        let first = CancellationToken::new();
        let (_tx1, rx1) = mpsc::channel(1);
        session.attach(StreamHandle::new(rx1, first.clone()));

        let (_tx2, rx2) = mpsc::channel(1);
        session.attach(StreamHandle::new(rx2, CancellationToken::new()));
        assert!(first.is_cancelled());
    }

    #[tokio::test]
    async fn closed_stream_clears_loading() {
        let mut session = ChatSession::new("c1");
        session.begin_send(vec![ContentPart::text("hi")]).unwrap();

        let (tx, rx) = mpsc::channel(1);
        session.attach(StreamHandle::new(rx, CancellationToken::new()));
        drop(tx);

        assert!(session.next_event().await.is_none());
        assert!(!session.is_loading());
    }
}
