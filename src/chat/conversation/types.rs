//! Remote conversation DTOs

use crate::chat::types::{Conversation, Message};
use serde::Deserialize;

/// Changes on one conversation since a sync cursor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDelta {
    /// Latest metadata, if it changed (or on a full fetch).
    #[serde(default)]
    pub conversation: Option<Conversation>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Cursor to pass as `since` next time.
    #[serde(default)]
    pub cursor: Option<String>,
    /// `messages` is the complete sequence and replaces the local one.
    #[serde(default)]
    pub full: bool,
}

/// One page of the remote conversation list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListResp {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}
