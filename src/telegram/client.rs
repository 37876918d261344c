use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum TelegramApiError {
    #[error("Failed to reach the Telegram Bot API.")]
    Http(#[from] reqwest::Error),
    #[error("The Telegram Bot API refused `{method}`: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

#[derive(serde::Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub chat_member: Option<ChatMemberUpdated>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
}

impl TelegramUser {
    pub fn handle(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.first_name)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatMember {
    pub status: String,
    pub user: TelegramUser,
}

impl ChatMember {
    pub fn is_member(&self) -> bool {
        matches!(self.status.as_str(), "member" | "administrator" | "creator")
    }

    pub fn has_left(&self) -> bool {
        matches!(self.status.as_str(), "left" | "kicked")
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub old_chat_member: ChatMember,
    pub new_chat_member: ChatMember,
}

/// Thin Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http_client: reqwest::Client,
    base_url: String,
    bot_token: Secret<String>,
}

impl TelegramClient {
    /// `timeout` must outlast the long-poll timeout passed to `get_updates`.
    pub fn new(base_url: String, bot_token: Secret<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build the Telegram http client");
        Self {
            http_client,
            base_url,
            bot_token,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: Value,
    ) -> Result<T, TelegramApiError> {
        let url = format!(
            "{}/bot{}/{}",
            self.base_url,
            self.bot_token.expose_secret(),
            method
        );
        let response: ApiResponse<T> = self
            .http_client
            .post(url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramApiError::Api {
                method,
                description: response
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    #[tracing::instrument(name = "Poll Telegram updates", skip(self))]
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_seconds: u64,
    ) -> Result<Vec<Update>, TelegramApiError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_seconds,
                "allowed_updates": ["message", "chat_member"],
            }),
        )
        .await
    }

    #[tracing::instrument(name = "Fetch Telegram chat member", skip(self))]
    pub async fn get_chat_member(
        &self,
        chat_id: &str,
        user_id: i64,
    ) -> Result<ChatMember, TelegramApiError> {
        self.call(
            "getChatMember",
            json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await
    }

    /// Sends a message, optionally with a single inline URL button.
    #[tracing::instrument(name = "Send Telegram message", skip(self, text))]
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        button: Option<(&str, &str)>,
    ) -> Result<Message, TelegramApiError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some((label, url)) = button {
            body["reply_markup"] = json!({
                "inline_keyboard": [[{ "text": label, "url": url }]]
            });
        }
        self.call("sendMessage", body).await
    }

    #[tracing::instrument(name = "Delete Telegram message", skip(self))]
    pub async fn delete_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<bool, TelegramApiError> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
    }
}
