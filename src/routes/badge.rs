use crate::{
    badge_users::{claim_badge, find_user, ClaimOutcome, UserKey},
    domain::{TaskStatus, UserEmail},
    error_handling::{detail_response, error_chain_fmt},
    startup::AppState,
};
use anyhow::Context;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use std::sync::Arc;

#[derive(thiserror::Error)]
pub enum BadgeError {
    #[error("{0}")]
    ValidationError(String),
    #[error("User not found")]
    UnknownUser,
    #[error("Not all tasks completed")]
    NotEligible,
    #[error("Badge already claimed")]
    AlreadyClaimed,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for BadgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl IntoResponse for BadgeError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            BadgeError::ValidationError(_) | BadgeError::NotEligible => StatusCode::BAD_REQUEST,
            BadgeError::UnknownUser => StatusCode::NOT_FOUND,
            BadgeError::AlreadyClaimed => StatusCode::CONFLICT,
            BadgeError::UnexpectedError(_) => {
                tracing::error!("{:?}", self);
                return detail_response(StatusCode::INTERNAL_SERVER_ERROR, self);
            }
        };
        tracing::warn!("{:?}", self);
        detail_response(status, self)
    }
}

#[derive(serde::Serialize)]
pub struct UserStatus {
    exists: bool,
    email: String,
    tasks: TaskStatus,
    can_claim: bool,
    badge_issued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<LinkedAccounts>,
}

#[derive(serde::Serialize)]
pub struct LinkedAccounts {
    telegram_username: Option<String>,
    discord_username: Option<String>,
    twitter_username: Option<String>,
}

#[tracing::instrument(name = "Check user status", skip(state))]
pub async fn user_status(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<UserStatus>, BadgeError> {
    let email = UserEmail::parse(email).map_err(BadgeError::ValidationError)?;
    let user = find_user(&state.connection_pool, UserKey::Email(&email))
        .await
        .context("Failed to look up the user.")?;

    let status = match user {
        None => UserStatus {
            exists: false,
            email: email.to_string(),
            tasks: TaskStatus::default(),
            can_claim: false,
            badge_issued: false,
            user_data: None,
        },
        Some(user) => {
            let tasks = user.tasks();
            UserStatus {
                exists: true,
                email: user.email,
                tasks,
                can_claim: tasks.all_completed(),
                badge_issued: user.badge_issued,
                user_data: Some(LinkedAccounts {
                    telegram_username: user.telegram_username,
                    discord_username: user.discord_username,
                    twitter_username: user.twitter_username,
                }),
            }
        }
    };
    Ok(Json(status))
}

#[derive(serde::Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    email: Option<String>,
}

#[tracing::instrument(name = "Claim a badge", skip(state, body))]
pub async fn claim(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClaimRequest>,
) -> Result<impl IntoResponse, BadgeError> {
    let email = body
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| BadgeError::ValidationError("Email required".into()))?;
    let email = UserEmail::parse(email).map_err(BadgeError::ValidationError)?;

    let outcome = claim_badge(&state.connection_pool, UserKey::Email(&email))
        .await
        .context("Failed to issue the badge.")?;
    match outcome {
        ClaimOutcome::Issued { badge_number } => {
            tracing::info!(badge_number, "Badge issued");
            Ok(Json(json!({
                "success": true,
                "message": "Badge claimed successfully!",
                "badge_number": badge_number
            })))
        }
        // Unknown users have, by definition, not completed their tasks.
        ClaimOutcome::UnknownUser | ClaimOutcome::NotEligible => Err(BadgeError::NotEligible),
        ClaimOutcome::AlreadyClaimed => Err(BadgeError::AlreadyClaimed),
    }
}

#[derive(serde::Serialize)]
pub struct ReferralSummary {
    email: String,
    referral_code: Option<String>,
    referral_link: Option<String>,
    successful_referrals: i32,
}

#[tracing::instrument(name = "Referral summary", skip(state))]
pub async fn referral_summary(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<ReferralSummary>, BadgeError> {
    let email = UserEmail::parse(email).map_err(BadgeError::ValidationError)?;
    let user = find_user(&state.connection_pool, UserKey::Email(&email))
        .await
        .context("Failed to look up the user.")?
        .ok_or(BadgeError::UnknownUser)?;

    let referral_link = user.referral_code.as_deref().map(|code| {
        let mut url = state.frontend_url.clone();
        url.query_pairs_mut().append_pair("ref", code);
        url.to_string()
    });
    Ok(Json(ReferralSummary {
        email: user.email,
        referral_code: user.referral_code,
        referral_link,
        successful_referrals: user.successful_referrals,
    }))
}
