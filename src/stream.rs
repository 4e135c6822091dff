//! Streaming chat replies over server-sent events.
//!
//! The backend answers `POST /interface_stream/` with lines of the form
//! `data: {"type": ...}`. Bytes are split into lines by [`LineBuffer`], each
//! `data:` line is decoded by [`parse_data_line`], and [`StreamAccumulator`]
//! folds the decoded events into one reply while emitting [`ChatEvent`]s.

use crate::config::Config;
use crate::error::{JunoError, Result};
use crate::events::{ChatEvent, ChatMessage, MessageContent, Role, StreamEvent};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DATA_PREFIX: &str = "data:";

/// Splits a byte stream into complete lines, holding back a trailing partial line.
///
/// Decoding happens per complete line, so multi-byte characters split across
/// chunk boundaries come out intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = &self.pending[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Take whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Decode one line of the stream.
///
/// Returns `None` for lines that carry no event: anything without the `data:`
/// prefix (SSE comments, blank separators) and empty payloads.
pub fn parse_data_line(line: &str) -> Option<serde_json::Result<StreamEvent>> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        return None;
    }
    Some(serde_json::from_str(payload))
}

/// Lifecycle of one streamed reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Done,
    Errored,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Done | StreamState::Errored)
    }
}

/// Folds stream events into a single reply.
///
/// Emits at most one terminal event; anything arriving after `done` or
/// `error` is dropped.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    state: StreamState,
    text: String,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            text: String::new(),
        }
    }

    pub fn start(&mut self) {
        if self.state == StreamState::Idle {
            self.state = StreamState::Streaming;
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Reply text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Process one decoded event
    pub fn apply(&mut self, event: StreamEvent) -> Option<ChatEvent> {
        if self.is_terminal() {
            return None;
        }
        self.start();

        match event {
            StreamEvent::Delta { text } => {
                if text.is_empty() {
                    return None;
                }
                self.text.push_str(&text);
                Some(ChatEvent::Delta(text))
            }
            StreamEvent::ToolCall { name, args } => Some(ChatEvent::ToolCall { name, args }),
            StreamEvent::Error { message } => {
                self.state = StreamState::Errored;
                Some(ChatEvent::Error(message))
            }
            StreamEvent::Done => {
                self.state = StreamState::Done;
                Some(ChatEvent::Complete {
                    text: self.text.clone(),
                })
            }
            StreamEvent::Unknown => None,
        }
    }

    /// The body ended without a `done` event
    pub fn finish(&mut self) -> Option<ChatEvent> {
        self.apply(StreamEvent::Done)
    }

    /// Transport-level failure
    pub fn fail(&mut self, message: impl Into<String>) -> Option<ChatEvent> {
        if self.is_terminal() {
            return None;
        }
        self.state = StreamState::Errored;
        Some(ChatEvent::Error(message.into()))
    }

    fn handle_line(&mut self, line: &str) -> Option<ChatEvent> {
        match parse_data_line(line)? {
            Ok(event) => self.apply(event),
            Err(e) => {
                tracing::warn!(error = %e, line, "skipping malformed stream event");
                None
            }
        }
    }
}

/// Read a response body to completion (or cancellation), forwarding events to `tx`.
///
/// Returns the final state. Stops as soon as a terminal event was sent, the
/// receiver is gone, or `cancel` fires; cancellation sends nothing further.
pub async fn pump_stream<S, B, E>(
    body: S,
    tx: &mpsc::Sender<ChatEvent>,
    cancel: &CancellationToken,
) -> StreamState
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut accumulator = StreamAccumulator::new();
    let mut lines = LineBuffer::new();
    accumulator.start();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("stream cancelled");
                return accumulator.state();
            }
            chunk = body.next() => chunk,
        };

        let events: Vec<ChatEvent> = match chunk {
            Some(Ok(bytes)) => lines
                .push(bytes.as_ref())
                .iter()
                .filter_map(|line| accumulator.handle_line(line))
                .collect(),
            Some(Err(e)) => accumulator.fail(e.to_string()).into_iter().collect(),
            None => {
                let mut events: Vec<ChatEvent> = lines
                    .finish()
                    .and_then(|line| accumulator.handle_line(&line))
                    .into_iter()
                    .collect();
                events.extend(accumulator.finish());
                events
            }
        };

        for event in events {
            if tx.send(event).await.is_err() {
                tracing::debug!("stream receiver dropped");
                return accumulator.state();
            }
        }

        if accumulator.is_terminal() {
            return accumulator.state();
        }
    }
}

/// One entry of the request history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl From<&ChatMessage> for ApiMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Body of `POST /interface_stream/`
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    pub messages: Vec<ApiMessage>,
    pub conversation_name: String,
}

impl StreamRequest {
    pub fn from_history(messages: &[ChatMessage], conversation_name: impl Into<String>) -> Self {
        Self {
            messages: messages.iter().map(ApiMessage::from).collect(),
            conversation_name: conversation_name.into(),
        }
    }
}

/// Receiving end of a running stream
pub struct StreamHandle {
    events: mpsc::Receiver<ChatEvent>,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn new(events: mpsc::Receiver<ChatEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll, for callers driving their own loop
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        self.events.try_recv().ok()
    }

    /// Stop the stream; no event is delivered after this returns
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
        while self.events.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// HTTP client for the streaming endpoint
#[derive(Clone)]
pub struct StreamClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl StreamClient {
    pub fn new(config: &Config, api_key: Option<String>) -> Result<Self> {
        // no overall timeout: a reply may stream for longer than any request timeout
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/interface_stream/", self.base_url)
    }

    /// Start streaming a reply; events arrive on the returned handle
    pub fn stream_response(&self, request: StreamRequest) -> StreamHandle {
        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();

        let client = self.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let state = match client.open(&request).await {
                Ok(response) => pump_stream(response.bytes_stream(), &tx, &task_cancel).await,
                Err(e) => {
                    if !task_cancel.is_cancelled() {
                        let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                    }
                    StreamState::Errored
                }
            };
            tracing::debug!(
                conversation = %request.conversation_name,
                ?state,
                "stream finished"
            );
        });

        StreamHandle::new(rx, cancel)
    }

    async fn open(&self, request: &StreamRequest) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.url())
            .header("Accept", "text/event-stream")
            .json(request);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            conversation = %request.conversation_name,
            messages = request.messages.len(),
            "opening chat stream"
        );
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(JunoError::Status { status, body });
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> {
        let owned: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    async fn run(parts: &[&str]) -> (Vec<ChatEvent>, StreamState) {
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let state = pump_stream(chunks(parts), &tx, &cancel).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, state)
    }

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"type\":").is_empty());
        let lines = buffer.push(b"\"done\"}\r\ndata: x");
        assert_eq!(lines, vec!["data: {\"type\":\"done\"}".to_string()]);
        assert_eq!(buffer.finish().as_deref(), Some("data: x"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_splits_many_lines_in_one_chunk() {
        let mut chunk = String::new();
        for i in 0..1000 {
            chunk.push_str(&format!("data: {i}\r\n\n"));
        }
        chunk.push_str("data: tail");

        let mut buffer = LineBuffer::new();
        let lines = buffer.push(chunk.as_bytes());
        assert_eq!(lines.len(), 2000);
        assert_eq!(lines[0], "data: 0");
        assert_eq!(lines[1], "");
        assert_eq!(lines[1998], "data: 999");
        assert_eq!(buffer.push(b"\n"), vec!["data: tail".to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn line_buffer_rejoins_split_utf8() {
        let text = "data: café\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..split]).is_empty());
        assert_eq!(buffer.push(&text[split..]), vec!["data: café".to_string()]);
    }

    #[test]
    fn parse_data_line_ignores_non_data_lines() {
        assert!(parse_data_line(": keep-alive").is_none());
        assert!(parse_data_line("").is_none());
        assert!(parse_data_line("data:   ").is_none());
        assert!(parse_data_line("event: message").is_none());

        let event = parse_data_line("data:{\"type\":\"delta\",\"text\":\"hi\"}")
            .unwrap()
            .unwrap();
        assert_eq!(event, StreamEvent::Delta { text: "hi".to_string() });
        assert!(parse_data_line("data: {not json").unwrap().is_err());
    }

    #[test]
    fn accumulator_ignores_events_after_terminal() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(acc.state(), StreamState::Idle);
        acc.apply(StreamEvent::Delta { text: "a".to_string() });
        assert_eq!(acc.state(), StreamState::Streaming);
        assert!(matches!(acc.apply(StreamEvent::Done), Some(ChatEvent::Complete { .. })));

        assert_eq!(acc.apply(StreamEvent::Error { message: "late".to_string() }), None);
        assert_eq!(acc.apply(StreamEvent::Delta { text: "b".to_string() }), None);
        assert_eq!(acc.fail("transport"), None);
        assert_eq!(acc.text(), "a");
        assert_eq!(acc.state(), StreamState::Done);
    }

    #[test]
    fn accumulator_skips_empty_deltas_and_keeps_text_on_tool_call() {
        let mut acc = StreamAccumulator::new();
        assert_eq!(acc.apply(StreamEvent::Delta { text: String::new() }), None);
        let event = acc.apply(StreamEvent::ToolCall {
            name: "internet_search".to_string(),
            args: json!({"query": "weather"}),
        });
        assert!(matches!(event, Some(ChatEvent::ToolCall { .. })));
        assert_eq!(acc.text(), "");
        assert_eq!(acc.apply(StreamEvent::Unknown), None);
    }

    #[tokio::test]
    async fn deltas_accumulate_and_complete_once() {
        let (events, state) = run(&[
            ": ping\n\n",
            "data: {\"type\":\"delta\",\"text\":\"Hel\"}\n\n",
            "data: {\"type\":\"delta\",\"te",
            "xt\":\"lo\"}\n\ndata: {\"type\":\"delta\",\"text\":\" world\"}\n\n",
            "data: {\"type\":\"done\"}\n\n",
        ])
        .await;

        assert_eq!(state, StreamState::Done);
        assert_eq!(
            events,
            vec![
                ChatEvent::Delta("Hel".to_string()),
                ChatEvent::Delta("lo".to_string()),
                ChatEvent::Delta(" world".to_string()),
                ChatEvent::Complete {
                    text: "Hello world".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn error_before_delta_reports_message_only() {
        let (events, state) = run(&[
            "data: {\"type\":\"error\",\"message\":\"quota exceeded\"}\n",
            "data: {\"type\":\"delta\",\"text\":\"never\"}\n",
            "data: {\"type\":\"done\"}\n",
        ])
        .await;

        assert_eq!(state, StreamState::Errored);
        assert_eq!(events, vec![ChatEvent::Error("quota exceeded".to_string())]);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let (events, _) = run(&[
            "data: {broken\n",
            "data: {\"type\":\"delta\",\"text\":\"ok\"}\n",
            "data: {\"type\":\"done\"}\n",
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ChatEvent::Delta("ok".to_string()));
    }

    #[tokio::test]
    async fn body_ending_without_done_completes_with_flushed_tail() {
        let (events, state) = run(&[
            "data: {\"type\":\"delta\",\"text\":\"a\"}\n",
            "data: {\"type\":\"delta\",\"text\":\"b\"}",
        ])
        .await;

        assert_eq!(state, StreamState::Done);
        assert_eq!(
            events.last(),
            Some(&ChatEvent::Complete {
                text: "ab".to_string()
            })
        );
    }

    #[tokio::test]
    async fn body_error_is_reported_once() {
        let body = stream::iter(vec![
            Ok(b"data: {\"type\":\"delta\",\"text\":\"a\"}\n".to_vec()),
            Err("connection reset".to_string()),
            Err("again".to_string()),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let state = pump_stream(body, &tx, &CancellationToken::new()).await;
        drop(tx);

        assert_eq!(state, StreamState::Errored);
        assert_eq!(rx.recv().await, Some(ChatEvent::Delta("a".to_string())));
        assert_eq!(rx.recv().await, Some(ChatEvent::Error("connection reset".to_string())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn cancelled_stream_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = pump_stream(chunks(&["data: {\"type\":\"done\"}\n"]), &tx, &cancel).await;
        drop(tx);

        assert_eq!(state, StreamState::Streaming);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn request_maps_roles() {
        let history = vec![
            ChatMessage::new(Role::User, MessageContent::from_text("hi"), "c1"),
            ChatMessage::new(Role::Assistant, MessageContent::from_text("hello"), "c1"),
        ];
        let request = StreamRequest::from_history(&history, "c1");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["conversation_name"], "c1");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"][0]["text"], "hello");
    }

    fn client_for(server: &MockServer, key: Option<&str>) -> StreamClient {
        let config = Config {
            backend_url: server.uri(),
            ..Config::default()
        };
        StreamClient::new(&config, key.map(str::to_string)).unwrap()
    }

    #[tokio::test]
    async fn streams_from_backend() {
        let server = MockServer::start().await;
        let body = ": connected\n\n\
            data: {\"type\":\"tool_call\",\"name\":\"internet_search\",\"args\":{\"query\":\"rust\"}}\n\n\
            data: {\"type\":\"delta\",\"text\":\"Rust \"}\n\n\
            data: {\"type\":\"delta\",\"text\":\"1.85\"}\n\n\
            data: {\"type\":\"done\"}\n\n";

        Mock::given(method("POST"))
            .and(path("/interface_stream/"))
            .and(header("authorization", "Bearer g-key"))
            .and(body_partial_json(json!({"conversation_name": "c1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let history = vec![ChatMessage::new(Role::User, MessageContent::from_text("latest rust?"), "c1")];
        let mut handle = client_for(&server, Some("g-key"))
            .stream_response(StreamRequest::from_history(&history, "c1"));

        let mut events = Vec::new();
        while let Some(event) = handle.recv().await {
            events.push(event);
        }

        assert!(matches!(&events[0], ChatEvent::ToolCall { name, .. } if name == "internet_search"));
        assert_eq!(
            events.last(),
            Some(&ChatEvent::Complete {
                text: "Rust 1.85".to_string()
            })
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn non_ok_status_is_a_single_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interface_stream/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("missing bearer"))
            .mount(&server)
            .await;

        let mut handle = client_for(&server, None).stream_response(StreamRequest::from_history(&[], "c1"));

        match handle.recv().await {
            Some(ChatEvent::Error(message)) => assert!(message.contains("401")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(handle.recv().await, None);
    }
}
