use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::dao::{Chat, Message};

/// Request body for `POST /api/send_message`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    /// Existing chat to continue; omitted to start a new chat.
    #[serde(default)]
    pub chat_id: Option<i64>,
    pub message: String,
}

/// Request body for `POST /api/retry`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RetryRequest {
    pub chat_id: i64,
    /// Literal text of the prior user turn to regenerate from.
    pub anchor_user_text: String,
    /// Delete everything after the anchor before regenerating.
    #[serde(default = "default_true")]
    pub truncate: bool,
}

fn default_true() -> bool {
    true
}

/// Request body for `POST /api/retitle_chat`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RetitleRequest {
    pub chat_id: i64,
    /// Seed text the title is derived from (the chat's first message).
    pub first_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub id: i64,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i64,
    pub content: String,
    pub is_user: bool,
    pub created_at: String,
}

/// Response body for `GET /api/chats/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatDetailResponse {
    #[serde(flatten)]
    pub chat: ChatResponse,
    pub messages: Vec<MessageResponse>,
}

/// Response body for `POST /api/retry`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetryResponse {
    pub ai_message: MessageResponse,
    pub chat_id: i64,
}

impl Chat {
    pub fn to_response(&self) -> ChatResponse {
        ChatResponse {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

impl Message {
    pub fn to_response(&self) -> MessageResponse {
        MessageResponse {
            id: self.id,
            content: self.content.clone(),
            is_user: self.is_user,
            created_at: self.created_at.to_rfc3339(),
        }
    }
}
