use crate::{
    badge_users::{find_user, link_twitter, UserKey},
    domain::{mask_email, ReferralCode, TaskStatus, UserEmail},
    error_handling::{detail_response, error_chain_fmt},
    oauth::{consume_state, generate_token, store_state, OAuthProvider, TwitterUser},
    routes::FrontendRedirect,
    startup::AppState,
};
use anyhow::Context;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use secrecy::Secret;
use serde_json::json;
use std::sync::Arc;

const PLATFORM: &str = "twitter";
const CODE_VERIFIER_LENGTH: usize = 64;

#[derive(thiserror::Error)]
pub enum TwitterError {
    #[error("{0}")]
    ValidationError(String),
    #[error("User not found")]
    UnknownUser,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for TwitterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl IntoResponse for TwitterError {
    fn into_response(self) -> Response {
        match self {
            TwitterError::ValidationError(_) => {
                tracing::warn!("{:?}", self);
                detail_response(StatusCode::BAD_REQUEST, self)
            }
            TwitterError::UnknownUser => {
                tracing::warn!("{:?}", self);
                detail_response(StatusCode::NOT_FOUND, self)
            }
            TwitterError::UnexpectedError(_) => {
                tracing::error!("{:?}", self);
                detail_response(StatusCode::INTERNAL_SERVER_ERROR, self)
            }
        }
    }
}

#[derive(serde::Deserialize)]
pub struct TwitterLoginParameters {
    #[serde(default)]
    email: Option<String>,
    #[serde(default, rename = "ref")]
    referral_code: Option<String>,
}

#[tracing::instrument(name = "Start Twitter authorization", skip(state, parameters))]
pub async fn twitter_login(
    State(state): State<Arc<AppState>>,
    Query(parameters): Query<TwitterLoginParameters>,
) -> Result<impl IntoResponse, TwitterError> {
    let email = match parameters.email.filter(|e| !e.trim().is_empty()) {
        Some(email) => UserEmail::parse(email).map_err(TwitterError::ValidationError)?,
        None => {
            return Err(TwitterError::ValidationError(
                "Please complete email verification first".into(),
            ))
        }
    };
    let referral_code = ReferralCode::parse_optional(parameters.referral_code.as_deref());

    let oauth_state = generate_token(32);
    let code_verifier = generate_token(CODE_VERIFIER_LENGTH);
    store_state(
        &state.connection_pool,
        OAuthProvider::Twitter,
        &oauth_state,
        email.as_ref(),
        referral_code.as_ref().map(|c| c.as_ref()),
        Some(&code_verifier),
    )
    .await
    .context("Failed to store the OAuth state.")?;

    let auth_url = state
        .twitter_client
        .authorization_url(&oauth_state, &code_verifier)
        .context("Failed to build the Twitter authorization url.")?;
    Ok(Json(json!({ "auth_url": auth_url.as_str() })))
}

#[derive(serde::Deserialize)]
pub struct TwitterCallbackParameters {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(thiserror::Error)]
enum CallbackError {
    #[error("The OAuth state is missing or was already used.")]
    InvalidState,
    #[error("Twitter did not hand back an authorization code.")]
    MissingCode,
    #[error("Failed to exchange the authorization code.")]
    TokenExchange(#[source] reqwest::Error),
    #[error("Failed to fetch the Twitter user.")]
    UserFetch(#[source] reqwest::Error),
    #[error("The email behind this flow is not valid.")]
    InvalidEmail,
    #[error("The Twitter account is already linked to {masked_email}.")]
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
        if let CallbackError::UnexpectedError(_) = &self {
            tracing::error!("{:?}", self);
        } else {
            tracing::warn!("{:?}", self);
        }
        let error = FrontendRedirect::new(&state.frontend_url, PLATFORM, "error");
        match self {
            CallbackError::InvalidState => error.message("invalid_state"),
            CallbackError::MissingCode => error.message("no_code"),
            CallbackError::TokenExchange(_) => error.message("token_exchange_failed"),
            CallbackError::UserFetch(_) => error.message("user_fetch_failed"),
            CallbackError::InvalidEmail => {
                error.message("Please complete email verification first")
            }
            CallbackError::UnknownUser => error.message("user_not_found"),
            CallbackError::UnexpectedError(_) => error,
            CallbackError::Duplicate {
                username,
                masked_email,
            } => FrontendRedirect::new(&state.frontend_url, PLATFORM, "duplicate")
                .message(&format!(
                    "This Twitter account (@{username}) is already linked to another email \
                     ({masked_email})"
                ))
                .param("username", &username),
        }
    }
}

#[tracing::instrument(name = "Twitter authorization callback", skip(state, parameters))]
pub async fn twitter_callback(
    State(state): State<Arc<AppState>>,
    Query(parameters): Query<TwitterCallbackParameters>,
) -> FrontendRedirect {
    let Some(oauth_state) = parameters.state.as_deref() else {
        return CallbackError::InvalidState.into_redirect(&state);
    };
    let pending =
        match consume_state(&state.connection_pool, OAuthProvider::Twitter, oauth_state).await {
            Ok(Some(pending)) => pending,
            Ok(None) => return CallbackError::InvalidState.into_redirect(&state),
            Err(e) => {
                return CallbackError::UnexpectedError(
                    anyhow::Error::new(e).context("Failed to consume the OAuth state."),
                )
                .into_redirect(&state)
            }
        };
    let Some(code_verifier) = pending.code_verifier else {
        return CallbackError::InvalidState.into_redirect(&state);
    };

    let outcome =
        complete_authorization(&state, parameters.code, &code_verifier, pending.email).await;
    outcome
        .unwrap_or_else(|e| e.into_redirect(&state))
        .referral(pending.referral_code.as_deref())
}

async fn complete_authorization(
    state: &AppState,
    code: Option<String>,
    code_verifier: &str,
    email: String,
) -> Result<FrontendRedirect, CallbackError> {
    let code = code.ok_or(CallbackError::MissingCode)?;
    let client = &state.twitter_client;

    let access_token = client
        .exchange_code(&code, code_verifier)
        .await
        .map_err(CallbackError::TokenExchange)?;
    let user = client
        .current_user(&access_token)
        .await
        .map_err(CallbackError::UserFetch)?;
    tracing::info!(twitter_id = %user.id, "Twitter user authenticated");

    let is_following = check_follow(state, &access_token, &user).await;

    let email = UserEmail::parse(email).map_err(|_| CallbackError::InvalidEmail)?;
    let pool = &state.connection_pool;
    if let Some(owner) = find_user(pool, UserKey::TwitterId(&user.id))
        .await
        .context("Failed to look up the Twitter account owner.")?
    {
        if owner.email != email.as_ref() {
            return Err(CallbackError::Duplicate {
                username: user.username,
                masked_email: mask_email(&owner.email),
            });
        }
    }

    let linked = link_twitter(pool, &email, &user.id, &user.username, is_following)
        .await
        .context("Failed to link the Twitter account.")?;
    if !linked {
        return Err(CallbackError::UnknownUser);
    }

    let redirect = if is_following {
        FrontendRedirect::new(&state.frontend_url, PLATFORM, "success")
            .param("username", &user.username)
    } else {
        FrontendRedirect::new(&state.frontend_url, PLATFORM, "not_following")
            .message(&format!(
                "Please follow @{} on Twitter first",
                state.twitter_target_username
            ))
            .param("username", &user.username)
    };
    Ok(redirect)
}

/// Without a target account to check against, following is taken as granted.
async fn check_follow(state: &AppState, access_token: &Secret<String>, user: &TwitterUser) -> bool {
    let target_id = match (state.twitter_verify_follow, state.twitter_target_id.as_deref()) {
        (true, Some(target_id)) => target_id,
        _ => return true,
    };
    state
        .twitter_client
        .follows(access_token, &user.id, target_id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error.cause_chain = ?e, "Failed to check the Twitter follow");
            false
        })
}

#[derive(serde::Serialize)]
pub struct TwitterStatus {
    twitter_id: String,
    username: Option<String>,
    twitter_followed: bool,
    badge_issued: bool,
    tasks_completed: TaskStatus,
}

#[tracing::instrument(name = "Twitter status", skip(state))]
pub async fn twitter_status(
    State(state): State<Arc<AppState>>,
    Path(twitter_id): Path<String>,
) -> Result<Json<TwitterStatus>, TwitterError> {
    let user = find_user(&state.connection_pool, UserKey::TwitterId(&twitter_id))
        .await
        .context("Failed to look up the Twitter account owner.")?
        .ok_or(TwitterError::UnknownUser)?;
    Ok(Json(TwitterStatus {
        tasks_completed: user.tasks(),
        twitter_id,
        username: user.twitter_username,
        twitter_followed: user.twitter_followed,
        badge_issued: user.badge_issued,
    }))
}
