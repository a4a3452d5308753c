//! Conversation HTTP API client
//!
//! The remote authority for conversations. The sync scheduler only sees the
//! `RemoteConversationSource` trait; `ConversationApi` is the HTTP version.

use crate::chat::conversation::types::{ConversationDelta, ConversationListResp};
use crate::chat::types::{handle_http_response, Conversation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait RemoteConversationSource: Send + Sync {
    /// Most recently updated conversations first.
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>>;

    /// Changes since `since`; `None` asks for everything.
    async fn fetch_conversation_delta(
        &self,
        conversation_id: &str,
        since: Option<&str>,
    ) -> Result<ConversationDelta>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListReq<'a> {
    #[serde(rename = "userID")]
    user_id: &'a str,
    limit: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeltaReq<'a> {
    #[serde(rename = "userID")]
    user_id: &'a str,
    #[serde(rename = "conversationID")]
    conversation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteReq<'a> {
    #[serde(rename = "userID")]
    user_id: &'a str,
    #[serde(rename = "conversationID")]
    conversation_id: &'a str,
}

/// Conversation endpoints over HTTP.
pub struct ConversationApi {
    client: reqwest::Client,
    api_base_url: String,
    user_id: String,
}

impl ConversationApi {
    /// `client` is expected to carry the auth header already.
    pub fn new(client: reqwest::Client, api_base_url: String, user_id: String) -> Self {
        Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            user_id,
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.api_base_url, path);
        debug!("[ConvAPI] POST {} (operationID {})", url, operation_id);

        self.client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))
    }
}

#[async_trait]
impl RemoteConversationSource for ConversationApi {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>> {
        let response = self
            .post(
                "/conversation/list",
                &ListReq {
                    user_id: &self.user_id,
                    limit,
                },
            )
            .await?;
        let resp = handle_http_response::<ConversationListResp>(response, "list conversations")
            .await?;
        let conversations = resp.data.map(|d| d.conversations).unwrap_or_default();
        info!("[ConvAPI] listed {} remote conversations", conversations.len());
        Ok(conversations)
    }

    async fn fetch_conversation_delta(
        &self,
        conversation_id: &str,
        since: Option<&str>,
    ) -> Result<ConversationDelta> {
        let response = self
            .post(
                "/conversation/delta",
                &DeltaReq {
                    user_id: &self.user_id,
                    conversation_id,
                    since,
                },
            )
            .await?;
        let resp =
            handle_http_response::<ConversationDelta>(response, "fetch conversation delta").await?;
        let delta = resp.data.unwrap_or_default();
        debug!(
            "[ConvAPI] delta for {}: {} messages, full={}, cursor={:?}",
            conversation_id,
            delta.messages.len(),
            delta.full,
            delta.cursor
        );
        Ok(delta)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let response = self
            .post(
                "/conversation/delete",
                &DeleteReq {
                    user_id: &self.user_id,
                    conversation_id,
                },
            )
            .await?;
        handle_http_response::<serde_json::Value>(response, "delete conversation").await?;
        info!("[ConvAPI] deleted remote conversation {}", conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_request_omits_missing_cursor() {
        let body = serde_json::to_value(DeltaReq {
            user_id: "u1",
            conversation_id: "c-1",
            since: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"userID": "u1", "conversationID": "c-1"})
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let api = ConversationApi::new(
            reqwest::Client::new(),
            "http://localhost:10002/".to_string(),
            "u1".to_string(),
        );
        assert_eq!(api.api_base_url, "http://localhost:10002");
    }
}
