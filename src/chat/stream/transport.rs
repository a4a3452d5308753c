//! HTTP chat transport
//!
//! `POST {api_base_url}/chat/send` answers with newline-delimited JSON, one
//! event per line:
//!
//! ```text
//! {"type":"conversation","conversation":{"conversationID":"c-1","title":"..."}}
//! {"type":"token","text":"Hel"}
//! {"type":"done"}
//! ```
//!
//! An `{"type":"error","message":"..."}` line ends the stream with an error.

use crate::chat::stream::session::{ChatTransport, EventStream, StreamEvent};
use crate::chat::types::Conversation;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Conversation { conversation: Conversation },
    Token { text: String },
    Done,
    Error { message: String },
}

impl WireEvent {
    fn into_event(self) -> Result<StreamEvent> {
        match self {
            WireEvent::Conversation { conversation } => {
                Ok(StreamEvent::ConversationAssigned(conversation))
            }
            WireEvent::Token { text } => Ok(StreamEvent::Token(text)),
            WireEvent::Done => Ok(StreamEvent::Done),
            WireEvent::Error { message } => Err(anyhow::anyhow!("server error: {message}")),
        }
    }
}

fn parse_line(line: &[u8]) -> Option<Result<StreamEvent>> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    let parsed = serde_json::from_slice::<WireEvent>(line)
        .with_context(|| format!("bad stream line: {}", String::from_utf8_lossy(line)))
        .and_then(WireEvent::into_event);
    Some(parsed)
}

struct LineState<S> {
    body: S,
    pending: Vec<u8>,
    ready: std::collections::VecDeque<Result<StreamEvent>>,
    finished: bool,
}

/// Splits a byte stream into events. Chunk boundaries may fall anywhere,
/// including inside a multi-byte character.
pub fn ndjson_events<S, E>(body: S) -> EventStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = LineState {
        body,
        pending: Vec::new(),
        ready: std::collections::VecDeque::new(),
        finished: false,
    };
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend_from_slice(&chunk);
                    while let Some(pos) = state.pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = state.pending.drain(..=pos).collect();
                        if let Some(event) = parse_line(&line) {
                            state.ready.push_back(event);
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .ready
                        .push_back(Err(anyhow::Error::new(e).context("reading reply stream")));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.pending);
                    if let Some(event) = parse_line(&rest) {
                        state.ready.push_back(event);
                    }
                }
            }
        }
    })
    .boxed()
}

pub struct HttpChatTransport {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
}

impl HttpChatTransport {
    /// `client` is expected to carry the auth header already.
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            user_id,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send_message(
        &self,
        conversation_id: Option<&str>,
        content: &str,
    ) -> Result<EventStream> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/chat/send", self.api_base_url);
        debug!(
            "[Stream] POST {} (conversation {:?}, operationID {})",
            url, conversation_id, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&serde_json::json!({
                "userID": self.user_id,
                "conversationID": conversation_id,
                "content": content,
            }))
            .send()
            .await
            .context("sending chat message")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("[Stream] chat send failed, status: {}, body: {}", status, text);
            return Err(anyhow::anyhow!("HTTP {}: {}", status, text));
        }

        Ok(ndjson_events(response.bytes_stream().boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&'static str]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + Unpin + 'static {
        futures_util::stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn events_survive_arbitrary_chunking() {
        let events: Vec<_> = ndjson_events(body(&[
            "{\"type\":\"conversation\",\"conversation\":{\"conversationID\":\"c-1\",\"title\":\"t\"}}\n{\"ty",
            "pe\":\"token\",\"text\":\"h\u{e9}\"}\n\n",
            "{\"type\":\"done\"}",
        ]))
        .collect()
        .await;

        assert_eq!(events.len(), 3);
        match &events[0] {
            Ok(StreamEvent::ConversationAssigned(c)) => assert_eq!(c.id, "c-1"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            events[1].as_ref().unwrap(),
            &StreamEvent::Token("h\u{e9}".to_string())
        );
        assert_eq!(events[2].as_ref().unwrap(), &StreamEvent::Done);
    }

    #[tokio::test]
    async fn split_multibyte_character_is_reassembled() {
        let line = "{\"type\":\"token\",\"text\":\"\u{1F600}\"}\n".as_bytes();
        let cut = line.iter().position(|b| *b == 0xF0).unwrap() + 2;
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::copy_from_slice(&line[..cut])),
            Ok(Bytes::copy_from_slice(&line[cut..])),
        ];
        let events: Vec<_> = ndjson_events(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Token("\u{1F600}".to_string())
        );
    }

    #[tokio::test]
    async fn error_line_and_garbage_surface_as_errors() {
        let events: Vec<_> = ndjson_events(body(&[
            "{\"type\":\"error\",\"message\":\"overloaded\"}\nnot json\n",
        ]))
        .collect()
        .await;
        assert_eq!(events.len(), 2);
        assert!(events[0]
            .as_ref()
            .unwrap_err()
            .to_string()
            .contains("overloaded"));
        assert!(events[1].is_err());
    }
}
