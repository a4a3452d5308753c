//! Outbound message streams
//!
//! `StreamCoordinator::send` wires one user message through the transport:
//! it registers the stream with the tracker and the cancellation registry,
//! shows the message optimistically, adopts it once the server assigns a
//! conversation, accumulates assistant tokens, and persists whatever was
//! produced when the stream completes, fails or is stopped by the user.

use crate::chat::cancellation::CancellationRegistry;
use crate::chat::conversation::store::ConversationStore;
use crate::chat::error::SendError;
use crate::chat::stream::tracker::StreamTracker;
use crate::chat::types::{Conversation, Message, MessageStatus};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Server created (or confirmed) the conversation for this exchange.
    ConversationAssigned(Conversation),
    Token(String),
    Done,
}

pub type EventStream = BoxStream<'static, anyhow::Result<StreamEvent>>;

/// Delivers a user message and returns the reply as a stream of events.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// `conversation_id` is `None` for a brand-new chat.
    async fn send_message(
        &self,
        conversation_id: Option<&str>,
        content: &str,
    ) -> anyhow::Result<EventStream>;
}

/// Assistant text received so far. Once sealed, further tokens are dropped.
struct StreamBuffer {
    text: Mutex<String>,
    token: CancellationToken,
}

impl StreamBuffer {
    fn new(token: CancellationToken) -> Self {
        Self {
            text: Mutex::new(String::new()),
            token,
        }
    }

    /// Appends unless the stream was cancelled; the check happens under the
    /// buffer lock so nothing lands after `seal` returns.
    fn push(&self, chunk: &str) -> bool {
        let mut text = self.text.lock();
        if self.token.is_cancelled() {
            return false;
        }
        text.push_str(chunk);
        true
    }

    /// Waits out any in-progress `push`. Called after the token is cancelled.
    fn seal(&self) -> usize {
        self.text.lock().len()
    }

    fn take(&self) -> String {
        std::mem::take(&mut *self.text.lock())
    }
}

/// What a finished `send` produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// `None` if the stream ended before the server assigned a conversation.
    pub conversation_id: Option<String>,
    pub user_message: Message,
    /// `None` when no assistant text arrived.
    pub assistant_message: Option<Message>,
    pub cancelled: bool,
}

pub struct StreamCoordinator {
    transport: Arc<dyn ChatTransport>,
    registry: Arc<CancellationRegistry>,
    tracker: Arc<StreamTracker>,
    store: Arc<ConversationStore>,
}

impl StreamCoordinator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        registry: Arc<CancellationRegistry>,
        tracker: Arc<StreamTracker>,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            transport,
            registry,
            tracker,
            store,
        }
    }

    /// Sends `content` to the active conversation (or starts a new one) and
    /// streams the reply into the store.
    pub async fn send(&self, content: &str) -> Result<SendOutcome, SendError> {
        let active = self.store.active_id();
        self.tracker.start_stream(active.clone())?;

        let token = CancellationToken::new();
        let buffer = Arc::new(StreamBuffer::new(token.clone()));
        self.registry.set(Some(token.clone()));
        {
            let tracker = self.tracker.clone();
            let buffer = buffer.clone();
            self.registry
                .set_save_callback(Some(Arc::new(move || {
                    tracker.set_pending_save(true);
                    let kept = buffer.seal();
                    debug!("[Stream] stop requested, keeping {} bytes", kept);
                })));
        }

        let result = self.drive(active, content, &token, &buffer).await;

        self.tracker.end_stream();
        self.registry.release();
        self.registry.set_save_callback(None);
        if token.is_cancelled() {
            // partial output is stored (or failed to store) by now
            self.tracker.set_pending_save(false);
        }
        result
    }

    async fn drive(
        &self,
        active: Option<String>,
        content: &str,
        token: &CancellationToken,
        buffer: &StreamBuffer,
    ) -> Result<SendOutcome, SendError> {
        let mut user_message = Message::user(active.clone(), content);
        self.persist_user_message(active.as_deref(), &user_message)
            .await?;
        let mut conversation_id = active;

        let connect = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.transport.send_message(conversation_id.as_deref(), content) => Some(result),
        };
        let mut events = match connect {
            None => {
                info!("[Stream] stopped before the reply stream opened");
                user_message.status = MessageStatus::Error;
                self.persist_user_message(conversation_id.as_deref(), &user_message)
                    .await?;
                return Ok(SendOutcome {
                    conversation_id,
                    user_message,
                    assistant_message: None,
                    cancelled: true,
                });
            }
            Some(Ok(events)) => events,
            Some(Err(e)) => {
                warn!("[Stream] message could not be sent: {:#}", e);
                user_message.status = MessageStatus::Error;
                self.persist_user_message(conversation_id.as_deref(), &user_message)
                    .await?;
                return Err(SendError::Transport(e));
            }
        };

        let mut failure = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = events.next() => event,
            };
            match event {
                None | Some(Ok(StreamEvent::Done)) => break,
                Some(Ok(StreamEvent::Token(chunk))) => {
                    if !buffer.push(&chunk) {
                        break;
                    }
                }
                Some(Ok(StreamEvent::ConversationAssigned(conversation))) => {
                    let id = conversation.id.clone();
                    self.assign_conversation(conversation, &mut user_message)
                        .await?;
                    conversation_id = Some(id);
                }
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        drop(events);

        let cancelled = token.is_cancelled();
        let text = buffer.take();
        info!(
            "[Stream] stream finished: conversation={:?}, {} bytes, cancelled={}, failed={}",
            conversation_id,
            text.len(),
            cancelled,
            failure.is_some()
        );

        // the server accepted the message once the stream opened
        user_message.status = MessageStatus::Sent;
        self.persist_user_message(conversation_id.as_deref(), &user_message)
            .await?;

        let assistant_message = match (&conversation_id, text.is_empty()) {
            (Some(id), false) => {
                let mut message = Message::assistant(Some(id.clone()));
                message.content = text;
                message.status = if failure.is_some() {
                    MessageStatus::Error
                } else {
                    MessageStatus::Sent
                };
                self.store.add_or_update_message(message.clone()).await?;
                Some(message)
            }
            (None, false) => {
                warn!("[Stream] reply arrived without a conversation id, dropped");
                None
            }
            (_, true) => None,
        };

        if let Some(e) = failure {
            warn!("[Stream] stream broke: {:#}", e);
            return Err(SendError::Transport(e));
        }

        Ok(SendOutcome {
            conversation_id,
            user_message,
            assistant_message,
            cancelled,
        })
    }

    /// Stores the conversation, points the tracker at it and moves the
    /// optimistic message into its sequence.
    async fn assign_conversation(
        &self,
        conversation: Conversation,
        user_message: &mut Message,
    ) -> Result<(), SendError> {
        let id = conversation.id.clone();
        debug!("[Stream] conversation assigned: {}", id);

        let existing = self.store.conversation(&id);
        if existing.as_ref() != Some(&conversation) {
            self.store.upsert_conversation(conversation).await?;
        }
        self.tracker.update_stream_conversation_id(&id);

        if user_message.conversation_id.is_none() {
            self.store.claim_optimistic(&id);
            self.store.adopt_optimistic(&id).await?;
            user_message.conversation_id = Some(id);
        }
        Ok(())
    }

    /// Writes the user message to its conversation, or into the optimistic
    /// slot while the server has not assigned one. The active pointer is not
    /// consulted: the user may have switched conversations mid-flight.
    async fn persist_user_message(
        &self,
        conversation_id: Option<&str>,
        user_message: &Message,
    ) -> Result<(), SendError> {
        match conversation_id {
            Some(_) => self.store.add_or_update_message(user_message.clone()).await?,
            None => self.store.restage_optimistic(user_message.clone()),
        }
        Ok(())
    }
}
