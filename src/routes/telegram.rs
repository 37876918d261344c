use crate::{
    badge_users::{
        claim_badge, find_user, link_telegram, relink_telegram, set_telegram_joined,
        update_telegram_profile, ClaimOutcome, TelegramLink, UserKey,
    },
    domain::{mask_email, ReferralCode, TelegramLogin, UserEmail},
    error_handling::{detail_response, error_chain_fmt},
    startup::AppState,
};
use anyhow::Context;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(thiserror::Error)]
pub enum TelegramError {
    #[error("{0}")]
    ValidationError(String),
    #[error("Invalid Telegram login")]
    InvalidLogin(#[source] crate::domain::TelegramLoginError),
    #[error("Please register with email first")]
    NotRegistered,
    #[error("This Telegram account is already linked to {0}")]
    AlreadyLinked(String),
    #[error("User not found. Please register with email first.")]
    EmailNotFound,
    #[error("User not found")]
    UnknownUser,
    #[error("Not all tasks completed")]
    NotEligible,
    #[error("Badge already claimed")]
    AlreadyClaimed,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for TelegramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl IntoResponse for TelegramError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            TelegramError::ValidationError(_)
            | TelegramError::NotRegistered
            | TelegramError::AlreadyLinked(_)
            | TelegramError::NotEligible => StatusCode::BAD_REQUEST,
            TelegramError::InvalidLogin(_) => StatusCode::FORBIDDEN,
            TelegramError::EmailNotFound | TelegramError::UnknownUser => StatusCode::NOT_FOUND,
            TelegramError::AlreadyClaimed => StatusCode::CONFLICT,
            TelegramError::UnexpectedError(_) => {
                tracing::error!("{:?}", self);
                return detail_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
            }
        };
        tracing::warn!("{:?}", self);
        detail_response(status, self)
    }
}

/// Telegram ids arrive both as JSON numbers and as strings.
fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Deserialize)]
pub struct LinkRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, deserialize_with = "optional_id")]
    telegram_id: Option<String>,
    #[serde(default)]
    telegram_username: Option<String>,
    #[serde(default)]
    is_channel_member: bool,
    #[serde(default)]
    referral_code: Option<String>,
}

/// A validated request to attach a Telegram account to an email user.
#[derive(Debug, Clone)]
pub struct AccountLink {
    pub email: UserEmail,
    pub telegram_id: String,
    pub telegram_username: String,
    pub is_channel_member: bool,
    pub referral_code: Option<ReferralCode>,
}

impl AccountLink {
    fn as_link(&self) -> TelegramLink<'_> {
        TelegramLink {
            email: &self.email,
            telegram_id: &self.telegram_id,
            telegram_username: &self.telegram_username,
            joined: self.is_channel_member,
            referred_by: self.referral_code.as_ref(),
        }
    }
}

impl TryFrom<LinkRequest> for AccountLink {
    type Error = TelegramError;

    fn try_from(value: LinkRequest) -> Result<Self, Self::Error> {
        let (email, telegram_id) = match (value.email, value.telegram_id) {
            (Some(email), Some(telegram_id)) if !email.trim().is_empty() => (email, telegram_id),
            _ => {
                return Err(TelegramError::ValidationError(
                    "Email and Telegram ID required".into(),
                ))
            }
        };
        Ok(Self {
            email: UserEmail::parse(email).map_err(TelegramError::ValidationError)?,
            telegram_id,
            telegram_username: value.telegram_username.unwrap_or_default(),
            is_channel_member: value.is_channel_member,
            referral_code: ReferralCode::parse_optional(value.referral_code.as_deref()),
        })
    }
}

#[tracing::instrument(
    name = "Telegram login widget",
    skip(state, payload),
    fields(telegram_id = tracing::field::Empty)
)]
pub async fn telegram_login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BTreeMap<String, Value>>,
) -> Result<impl IntoResponse, TelegramError> {
    let login = TelegramLogin::verify(&payload, &state.telegram_bot_token, Utc::now().timestamp())
        .map_err(TelegramError::InvalidLogin)?;
    tracing::Span::current().record("telegram_id", &tracing::field::display(&login.id));

    let updated = update_telegram_profile(
        &state.connection_pool,
        &login.id,
        &login.username,
        &login.first_name,
        &login.last_name,
    )
    .await
    .context("Failed to update the Telegram profile.")?;
    if !updated {
        return Err(TelegramError::NotRegistered);
    }
    Ok(Json(json!({ "status": "ok", "telegram_id": login.id })))
}

/// Links the account unless the Telegram id already belongs to someone else.
#[tracing::instrument(name = "Link Telegram with channel check", skip(pool))]
pub async fn link_account(pool: &PgPool, link: &AccountLink) -> Result<(), TelegramError> {
    if let Some(owner) = find_user(pool, UserKey::TelegramId(&link.telegram_id))
        .await
        .context("Failed to look up the Telegram account owner.")?
    {
        if owner.email != link.email.as_ref() {
            return Err(TelegramError::AlreadyLinked(mask_email(&owner.email)));
        }
    }
    let linked = link_telegram(pool, &link.as_link())
        .await
        .context("Failed to link the Telegram account.")?;
    if !linked {
        return Err(TelegramError::EmailNotFound);
    }
    Ok(())
}

pub async fn link_with_channel_check(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LinkRequest>,
) -> Result<impl IntoResponse, TelegramError> {
    let link = AccountLink::try_from(body)?;
    link_account(&state.connection_pool, &link).await?;
    Ok(Json(json!({ "status": "ok", "message": "Telegram linked successfully" })))
}

#[derive(Deserialize)]
pub struct ChannelStatusRequest {
    #[serde(default, deserialize_with = "optional_id")]
    telegram_id: Option<String>,
    #[serde(default)]
    is_channel_member: bool,
}

#[tracing::instrument(name = "Update channel status", skip(state, body))]
pub async fn update_channel_status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChannelStatusRequest>,
) -> Result<impl IntoResponse, TelegramError> {
    let telegram_id = body
        .telegram_id
        .ok_or_else(|| TelegramError::ValidationError("Telegram ID required".into()))?;
    let updated = set_telegram_joined(&state.connection_pool, &telegram_id, body.is_channel_member)
        .await
        .context("Failed to update the channel status.")?;
    if !updated {
        return Err(TelegramError::UnknownUser);
    }
    Ok(Json(json!({ "status": "success" })))
}

#[tracing::instrument(name = "Telegram badge status", skip(state))]
pub async fn telegram_badge_status(
    State(state): State<Arc<AppState>>,
    Path(telegram_id): Path<String>,
) -> Result<impl IntoResponse, TelegramError> {
    let user = find_user(&state.connection_pool, UserKey::TelegramId(&telegram_id))
        .await
        .context("Failed to look up the Telegram account owner.")?
        .ok_or(TelegramError::UnknownUser)?;
    Ok(Json(json!({ "badge_issued": user.badge_issued })))
}

#[derive(Deserialize)]
pub struct IssueBadgeRequest {
    #[serde(default, deserialize_with = "optional_id")]
    telegram_id: Option<String>,
}

#[tracing::instrument(name = "Issue badge by Telegram id", skip(state, body))]
pub async fn telegram_issue_badge(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IssueBadgeRequest>,
) -> Result<impl IntoResponse, TelegramError> {
    let telegram_id = body
        .telegram_id
        .ok_or_else(|| TelegramError::ValidationError("Telegram ID required".into()))?;
    let outcome = claim_badge(&state.connection_pool, UserKey::TelegramId(&telegram_id))
        .await
        .context("Failed to issue the badge.")?;
    match outcome {
        ClaimOutcome::Issued { badge_number } => Ok(Json(json!({
            "status": "issued",
            "telegram_id": telegram_id,
            "badge_number": badge_number
        }))),
        ClaimOutcome::UnknownUser => Err(TelegramError::UnknownUser),
        ClaimOutcome::NotEligible => Err(TelegramError::NotEligible),
        ClaimOutcome::AlreadyClaimed => Err(TelegramError::AlreadyClaimed),
    }
}

#[tracing::instrument(name = "Link Telegram, replacing other owners", skip(state, body))]
pub async fn link_simple(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LinkRequest>,
) -> Result<impl IntoResponse, TelegramError> {
    let email = body
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| TelegramError::ValidationError("Email required".into()))?;
    let email = UserEmail::parse(email).map_err(TelegramError::ValidationError)?;
    let telegram_id = body
        .telegram_id
        .ok_or_else(|| TelegramError::ValidationError("Telegram ID required".into()))?;
    let telegram_username = body.telegram_username.unwrap_or_default();

    let linked = relink_telegram(
        &state.connection_pool,
        &TelegramLink {
            email: &email,
            telegram_id: &telegram_id,
            telegram_username: &telegram_username,
            joined: true,
            referred_by: None,
        },
    )
    .await
    .context("Failed to link the Telegram account.")?;
    if !linked {
        return Err(TelegramError::UnknownUser);
    }
    Ok(Json(json!({ "status": "success", "telegram_id": telegram_id })))
}

#[tracing::instrument(name = "Verify and update Telegram", skip(state, body))]
pub async fn verify_and_update(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LinkRequest>,
) -> Result<impl IntoResponse, TelegramError> {
    let link = AccountLink::try_from(body)?;
    let pool = &state.connection_pool;

    let user = find_user(pool, UserKey::Email(&link.email))
        .await
        .context("Failed to look up the user.")?
        .ok_or(TelegramError::EmailNotFound)?;

    if let Some(owner) = find_user(pool, UserKey::TelegramId(&link.telegram_id))
        .await
        .context("Failed to look up the Telegram account owner.")?
    {
        if owner.id != user.id {
            return Ok(Json(json!({
                "status": "already_linked_other",
                "message": format!(
                    "This Telegram account is already linked to {}",
                    mask_email(&owner.email)
                )
            })));
        }
    }

    if user.telegram_joined && user.telegram_id.as_deref() == Some(link.telegram_id.as_str()) {
        return Ok(Json(json!({
            "status": "already_verified",
            "message": "Your Telegram is already verified!"
        })));
    }

    let linked = link_telegram(pool, &link.as_link())
        .await
        .context("Failed to update the user record.")?;
    if !linked {
        return Err(TelegramError::EmailNotFound);
    }
    Ok(Json(json!({
        "status": "success",
        "message": "Telegram verification completed successfully!"
    })))
}

#[tracing::instrument(name = "Force verify Telegram", skip(state, body))]
pub async fn force_verify_telegram(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LinkRequest>,
) -> Result<impl IntoResponse, TelegramError> {
    let mut link = AccountLink::try_from(body)?;
    link.is_channel_member = true;

    let linked = relink_telegram(&state.connection_pool, &link.as_link())
        .await
        .context("Failed to link the Telegram account.")?;
    if !linked {
        return Err(TelegramError::EmailNotFound);
    }
    tracing::info!(telegram_id = %link.telegram_id, "Force verified Telegram");
    Ok(Json(json!({
        "status": "success",
        "message": "Telegram verification completed successfully!",
        "telegram_joined": true
    })))
}

#[derive(serde::Serialize)]
pub struct TelegramUserSummary {
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    badge_issued: bool,
    discord_id: Option<String>,
    twitter_id: Option<String>,
    email: String,
}

#[tracing::instrument(name = "Look up Telegram user", skip(state))]
pub async fn verify_telegram_user(
    State(state): State<Arc<AppState>>,
    Path(telegram_id): Path<String>,
) -> Result<Json<TelegramUserSummary>, TelegramError> {
    let user = find_user(&state.connection_pool, UserKey::TelegramId(&telegram_id))
        .await
        .context("Failed to look up the Telegram account owner.")?
        .ok_or(TelegramError::UnknownUser)?;
    Ok(Json(TelegramUserSummary {
        username: user.username,
        first_name: user.first_name,
        last_name: user.last_name,
        badge_issued: user.badge_issued,
        discord_id: user.discord_id,
        twitter_id: user.twitter_id,
        email: user.email,
    }))
}
