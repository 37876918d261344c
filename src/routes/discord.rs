use crate::{
    badge_users::{find_user, link_discord, UserKey},
    domain::{mask_email, ReferralCode, TaskStatus, UserEmail},
    error_handling::{detail_response, error_chain_fmt},
    oauth::{consume_state, generate_token, store_state, OAuthProvider},
    routes::FrontendRedirect,
    startup::AppState,
};
use anyhow::Context;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;

const PLATFORM: &str = "discord";

#[derive(thiserror::Error)]
pub enum DiscordError {
    #[error("{0}")]
    ValidationError(String),
    #[error("User not found")]
    UnknownUser,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for DiscordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl IntoResponse for DiscordError {
    fn into_response(self) -> Response {
        let status = match self {
            DiscordError::ValidationError(_) => StatusCode::BAD_REQUEST,
            DiscordError::UnknownUser => StatusCode::NOT_FOUND,
            DiscordError::UnexpectedError(_) => {
                tracing::error!("{:?}", self);
                return detail_response(StatusCode::INTERNAL_SERVER_ERROR, self);
            }
        };
        tracing::warn!("{:?}", self);
        detail_response(status, self)
    }
}

#[derive(serde::Deserialize)]
pub struct DiscordLoginParameters {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "ref")]
    referral_code: Option<String>,
}

#[tracing::instrument(name = "Start Discord authorization", skip(state, parameters))]
pub async fn discord_login(
    State(state): State<Arc<AppState>>,
    Query(parameters): Query<DiscordLoginParameters>,
) -> Result<impl IntoResponse, DiscordError> {
    let email = parameters
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| {
            DiscordError::ValidationError("Please complete email verification first".into())
        })
        .and_then(|e| UserEmail::parse(e).map_err(DiscordError::ValidationError))?;
    let referral_code = ReferralCode::parse_optional(parameters.referral_code.as_deref());

    let oauth_state = generate_token(32);
    store_state(
        &state.connection_pool,
        OAuthProvider::Discord,
        &oauth_state,
        email.as_ref(),
        referral_code.as_ref().map(|c| c.as_ref()),
        None,
    )
    .await
    .context("Failed to store the OAuth state.")?;

    let auth_url = state
        .discord_client
        .authorization_url(&oauth_state)
        .context("Failed to build the Discord authorization url.")?;
    Ok(Json(json!({ "auth_url": auth_url.as_str() })))
}

#[derive(serde::Deserialize)]
pub struct DiscordCallbackParameters {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Why a callback ended without linking the account. Each variant becomes a
/// redirect to the website rather than an error page.
#[derive(thiserror::Error)]
enum CallbackError {
    #[error("The OAuth state is missing or was already used.")]
    InvalidState,
    #[error("Discord did not hand back an authorization code.")]
    MissingCode,
    #[error("Failed to exchange the authorization code.")]
    TokenExchange(#[source] reqwest::Error),
    #[error("Failed to fetch the Discord user.")]
    UserFetch(#[source] reqwest::Error),
    #[error("The email behind this flow is not valid.")]
    InvalidEmail,
    #[error("The Discord account is already linked to {masked_email}.")]
    Duplicate {
        username: String,
        masked_email: String,
    },
    #[error("No user is registered with this email.")]
    UnknownUser,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl CallbackError {
    fn into_redirect(self, state: &AppState) -> FrontendRedirect {
        match &self {
            CallbackError::UnexpectedError(_) => tracing::error!("{:?}", self),
            _ => tracing::warn!("{:?}", self),
        }
        let error = |message: &str| {
            FrontendRedirect::new(&state.frontend_url, PLATFORM, "error").message(message)
        };
        match self {
            CallbackError::InvalidState => error("invalid_state"),
            CallbackError::MissingCode | CallbackError::UnexpectedError(_) => {
                FrontendRedirect::new(&state.frontend_url, PLATFORM, "error")
            }
            CallbackError::TokenExchange(_) => error("token_exchange_failed"),
            CallbackError::UserFetch(_) => error("user_fetch_failed"),
            CallbackError::InvalidEmail => error("Please complete email verification first"),
            CallbackError::UnknownUser => error("user_not_found"),
            CallbackError::Duplicate {
                username,
                masked_email,
            } => FrontendRedirect::new(&state.frontend_url, PLATFORM, "duplicate")
                .message(&format!(
                    "This Discord account (@{username}) is already linked to another email \
                     ({masked_email}). Each Discord account can only earn one badge."
                ))
                .param("username", &username),
        }
    }
}

#[tracing::instrument(name = "Discord authorization callback", skip(state, parameters))]
pub async fn discord_callback(
    State(state): State<Arc<AppState>>,
    Query(parameters): Query<DiscordCallbackParameters>,
) -> FrontendRedirect {
    let pending = match parameters.state.as_deref() {
        Some(oauth_state) => {
            match consume_state(&state.connection_pool, OAuthProvider::Discord, oauth_state).await
            {
                Ok(pending) => pending,
                Err(e) => {
                    return CallbackError::UnexpectedError(
                        anyhow::Error::new(e).context("Failed to consume the OAuth state."),
                    )
                    .into_redirect(&state)
                }
            }
        }
        None => None,
    };
    let Some(pending) = pending else {
        return CallbackError::InvalidState.into_redirect(&state);
    };
    let referral_code = pending.referral_code.clone();

    let redirect = match complete_authorization(&state, parameters.code, pending.email).await {
        Ok(redirect) => redirect,
        Err(e) => e.into_redirect(&state),
    };
    redirect.referral(referral_code.as_deref())
}

async fn complete_authorization(
    state: &AppState,
    code: Option<String>,
    email: String,
) -> Result<FrontendRedirect, CallbackError> {
    let code = code.ok_or(CallbackError::MissingCode)?;
    let client = &state.discord_client;

    let access_token = client
        .exchange_code(&code)
        .await
        .map_err(CallbackError::TokenExchange)?;
    let user = client
        .current_user(&access_token)
        .await
        .map_err(CallbackError::UserFetch)?;
    let display_name = user.display_name().to_string();
    tracing::info!(discord_id = %user.id, "Discord user authenticated");

    let is_member = client
        .is_guild_member(&access_token, &user.id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error.cause_chain = ?e, "Failed to check Discord guild membership");
            false
        });

    let email = UserEmail::parse(email).map_err(|_| CallbackError::InvalidEmail)?;
    let pool = &state.connection_pool;
    if let Some(owner) = find_user(pool, UserKey::DiscordId(&user.id))
        .await
        .context("Failed to look up the Discord account owner.")?
    {
        if owner.email != email.as_ref() {
            return Err(CallbackError::Duplicate {
                username: display_name,
                masked_email: mask_email(&owner.email),
            });
        }
    }

    let linked = link_discord(pool, &email, &user.id, &display_name, is_member)
        .await
        .context("Failed to link the Discord account.")?;
    if !linked {
        return Err(CallbackError::UnknownUser);
    }

    let redirect = if is_member {
        FrontendRedirect::new(&state.frontend_url, PLATFORM, "success")
            .param("username", &display_name)
    } else {
        let invite = &state.discord_invite_link;
        FrontendRedirect::new(&state.frontend_url, PLATFORM, "not_member")
            .message(&format!(
                "Please join the IOPn Discord server first. Invite link: {invite}"
            ))
            .param("invite", invite)
    };
    Ok(redirect)
}

#[derive(serde::Serialize)]
pub struct DiscordStatus {
    discord_id: String,
    username: Option<String>,
    discord_joined: bool,
    badge_issued: bool,
    tasks_completed: TaskStatus,
}

#[tracing::instrument(name = "Discord status", skip(state))]
pub async fn discord_status(
    State(state): State<Arc<AppState>>,
    Path(discord_id): Path<String>,
) -> Result<Json<DiscordStatus>, DiscordError> {
    let user = find_user(&state.connection_pool, UserKey::DiscordId(&discord_id))
        .await
        .context("Failed to look up the Discord account owner.")?
        .ok_or(DiscordError::UnknownUser)?;
    Ok(Json(DiscordStatus {
        tasks_completed: user.tasks(),
        discord_id,
        username: user.discord_username,
        discord_joined: user.discord_joined,
        badge_issued: user.badge_issued,
    }))
}
