use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Response envelope shared by every remote endpoint (`errCode`, `errMsg`, `data`).
/// `data` may be null or missing, so it is an `Option<T>`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg", default)]
    pub err_msg: String,
    pub data: Option<T>,
}

/// Decodes a remote response into `ApiResponse<T>`, turning HTTP failures and
/// non-zero `errCode`s into errors.
pub async fn handle_http_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> anyhow::Result<ApiResponse<T>> {
    use anyhow::Context;

    let status = response.status();

    // the body can only be read once
    let body_bytes = response
        .bytes()
        .await
        .with_context(|| format!("reading {operation_name} response body"))?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[HTTP] {} response body: {}", operation_name, body_str);

    if !status.is_success() {
        error!(
            "[HTTP] {} failed, status: {}, body: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP {}: {}", status, body_str));
    }

    let api_resp: ApiResponse<T> = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {} could not be decoded: {:?}\nraw body: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("decoding {} response: {}", operation_name, e)
    })?;

    if api_resp.err_code != 0 {
        error!(
            "[HTTP] {} server error, code: {}, message: {}",
            operation_name, api_resp.err_code, api_resp.err_msg
        );
        return Err(anyhow::anyhow!(
            "server error {}: {}",
            api_resp.err_code,
            api_resp.err_msg
        ));
    }

    Ok(api_resp)
}

// ========== conversations ==========

/// Conversation metadata as stored locally and returned by the remote authority.
/// Missing fields fall back to defaults so partial server payloads still decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "conversationID")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_starred: bool,
    /// Created by the system rather than the user (e.g. onboarding chats).
    #[serde(default)]
    pub is_system: bool,
    /// Why a system conversation exists; `None` for user conversations.
    #[serde(default)]
    pub system_purpose: Option<String>,
    #[serde(default)]
    pub is_unread: bool,
    #[serde(rename = "ownerID", default)]
    pub owner_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            is_starred: false,
            is_system: false,
            system_purpose: None,
            is_unread: false,
            owner_id: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stand-in entry for a conversation that has messages but no metadata yet.
    pub(crate) fn placeholder(id: &str) -> Self {
        Self::new(id, "")
    }
}

/// Shallow partial update for `Conversation`; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_starred: Option<bool>,
    pub is_unread: Option<bool>,
    pub system_purpose: Option<Option<String>>,
    pub updated_at: Option<i64>,
}

impl ConversationPatch {
    pub fn apply(&self, conversation: &mut Conversation) {
        if let Some(title) = &self.title {
            conversation.title = title.clone();
        }
        if let Some(description) = &self.description {
            conversation.description = description.clone();
        }
        if let Some(is_starred) = self.is_starred {
            conversation.is_starred = is_starred;
        }
        if let Some(is_unread) = self.is_unread {
            conversation.is_unread = is_unread;
        }
        if let Some(purpose) = &self.system_purpose {
            conversation.system_purpose = purpose.clone();
        }
        conversation.updated_at = self.updated_at.unwrap_or_else(now_millis);
    }
}

// ========== messages ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Error,
}

/// File reference attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "messageID")]
    pub id: String,
    /// `None` only for the in-flight optimistic message of a brand-new chat.
    #[serde(rename = "conversationID", default)]
    pub conversation_id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: MessageStatus,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Tool results and similar structured blobs; never interpreted here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payloads: Vec<serde_json::Value>,
}

impl Message {
    fn local(conversation_id: Option<String>, role: Role, content: String) -> Self {
        Self {
            id: format!("local-{}", Uuid::new_v4()),
            conversation_id,
            role,
            content,
            status: MessageStatus::Sending,
            created_at: now_millis(),
            attachments: Vec::new(),
            payloads: Vec::new(),
        }
    }

    /// A user message that has not been acknowledged yet.
    pub fn user(conversation_id: Option<String>, content: impl Into<String>) -> Self {
        Self::local(conversation_id, Role::User, content.into())
    }

    /// An empty assistant message about to be filled by a stream.
    pub fn assistant(conversation_id: Option<String>) -> Self {
        Self::local(conversation_id, Role::Assistant, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_decodes_with_missing_fields() {
        let conv: Conversation =
            serde_json::from_str(r#"{"conversationID":"c-1","title":"hi","isStarred":true}"#)
                .unwrap();
        assert_eq!(conv.id, "c-1");
        assert!(conv.is_starred);
        assert_eq!(conv.system_purpose, None);
        assert_eq!(conv.updated_at, 0);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut conv = Conversation::new("c-1", "old");
        conv.description = "keep me".to_string();
        let patch = ConversationPatch {
            title: Some("new".to_string()),
            updated_at: Some(42),
            ..Default::default()
        };
        patch.apply(&mut conv);
        assert_eq!(conv.title, "new");
        assert_eq!(conv.description, "keep me");
        assert_eq!(conv.updated_at, 42);
    }

    #[test]
    fn message_wire_shape() {
        let json = r#"{"messageID":"m-1","conversationID":null,"role":"user","content":"hello","status":"sending","createdAt":5}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.conversation_id, None);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.status, MessageStatus::Sending);
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn local_messages_get_unique_ids() {
        let a = Message::user(None, "a");
        let b = Message::user(None, "a");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("local-"));
        assert_eq!(a.status, MessageStatus::Sending);
    }
}
