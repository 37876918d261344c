use crate::{
    badge_users::{find_user, upsert_verified_email, UserKey},
    domain::{TaskStatus, UserEmail, VerificationCode},
    email_client::EmailClient,
    error_handling::{detail_response, error_chain_fmt},
    startup::AppState,
};
use anyhow::Context;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

const CODE_TTL_MINUTES: i64 = 5;

#[derive(serde::Deserialize)]
pub struct EmailRequest {
    email: String,
}

#[derive(serde::Deserialize)]
pub struct VerifyCodeRequest {
    email: String,
    code: String,
}

#[derive(thiserror::Error)]
pub enum EmailVerificationError {
    #[error("{0}")]
    ValidationError(String),
    #[error("No verification code found. Please request a new one.")]
    NoCode,
    #[error("Code expired. Please request a new one.")]
    Expired,
    #[error("Invalid code. Please try again.")]
    InvalidCode,
    #[error("User not found")]
    UnknownUser,
    #[error("Failed to send the verification email.")]
    SendEmailError(#[source] reqwest::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for EmailVerificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl IntoResponse for EmailVerificationError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            EmailVerificationError::ValidationError(_)
            | EmailVerificationError::NoCode
            | EmailVerificationError::Expired
            | EmailVerificationError::InvalidCode => {
                tracing::warn!("{:?}", self);
                StatusCode::BAD_REQUEST
            }
            EmailVerificationError::UnknownUser => {
                tracing::warn!("{:?}", self);
                StatusCode::NOT_FOUND
            }
            EmailVerificationError::SendEmailError(_)
            | EmailVerificationError::UnexpectedError(_) => {
                tracing::error!("{:?}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        detail_response(status, self)
    }
}

#[tracing::instrument(
    name = "Send an email verification code",
    skip(state, body),
    fields(user_email = %body.email)
)]
pub async fn send_verification(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EmailRequest>,
) -> Result<impl IntoResponse, EmailVerificationError> {
    let email = UserEmail::parse(body.email).map_err(EmailVerificationError::ValidationError)?;
    let pool = &state.connection_pool;

    if find_user(pool, UserKey::Email(&email))
        .await
        .context("Failed to look up the user.")?
        .is_some()
    {
        tracing::info!("Existing user is logging in");
    }

    let code = VerificationCode::generate();
    store_verification_code(pool, &email, &code, Utc::now() + Duration::minutes(CODE_TTL_MINUTES))
        .await
        .context("Failed to store the verification code.")?;
    send_verification_email(&state.email_client, &email, &code)
        .await
        .map_err(EmailVerificationError::SendEmailError)?;

    Ok(Json(json!({
        "success": true,
        "message": "Verification code sent to your email"
    })))
}

#[tracing::instrument(name = "Verify an email code", skip(state, body), fields(user_email = %body.email))]
pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyCodeRequest>,
) -> Result<impl IntoResponse, EmailVerificationError> {
    let email = UserEmail::parse(body.email).map_err(EmailVerificationError::ValidationError)?;
    let pool = &state.connection_pool;

    let stored = get_verification_code(pool, &email)
        .await
        .context("Failed to fetch the verification code.")?
        .ok_or(EmailVerificationError::NoCode)?;

    if stored.expires_at < Utc::now() {
        delete_verification_code(pool, &email)
            .await
            .context("Failed to delete an expired verification code.")?;
        return Err(EmailVerificationError::Expired);
    }

    let submitted =
        VerificationCode::parse(&body.code).map_err(|_| EmailVerificationError::InvalidCode)?;
    if submitted.as_ref() != stored.code {
        return Err(EmailVerificationError::InvalidCode);
    }

    let mut transaction = pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool.")?;
    delete_verification_code(&mut transaction, &email)
        .await
        .context("Failed to delete a used verification code.")?;
    let user = upsert_verified_email(&mut transaction, &email)
        .await
        .context("Failed to save the verified email.")?;
    transaction
        .commit()
        .await
        .context("Failed to commit the email verification.")?;
    tracing::info!(user_id = user.id, "Email verified");

    Ok(Json(json!({
        "success": true,
        "email": email.as_ref(),
        "message": "Email verified successfully"
    })))
}

#[derive(serde::Serialize)]
pub struct EmailStatus {
    email: String,
    email_added: bool,
    badge_issued: bool,
    tasks_completed: TaskStatus,
}

#[tracing::instrument(name = "Email status", skip(state))]
pub async fn email_status(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<EmailStatus>, EmailVerificationError> {
    let email = UserEmail::parse(email).map_err(EmailVerificationError::ValidationError)?;
    let user = find_user(&state.connection_pool, UserKey::Email(&email))
        .await
        .context("Failed to look up the user.")?
        .ok_or(EmailVerificationError::UnknownUser)?;
    Ok(Json(EmailStatus {
        email: user.email.clone(),
        email_added: user.email_added,
        badge_issued: user.badge_issued,
        tasks_completed: user.tasks(),
    }))
}

#[derive(sqlx::FromRow)]
struct StoredCode {
    code: String,
    expires_at: DateTime<Utc>,
}

/// One outstanding code per email: a new code replaces the previous one.
#[tracing::instrument(name = "Store verification code", skip(pool, code))]
async fn store_verification_code(
    pool: &PgPool,
    email: &UserEmail,
    code: &VerificationCode,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO email_verification_codes (email, code, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at
        "#,
    )
    .bind(email.as_ref())
    .bind(code.as_ref())
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

async fn get_verification_code(
    pool: &PgPool,
    email: &UserEmail,
) -> Result<Option<StoredCode>, sqlx::Error> {
    sqlx::query_as::<_, StoredCode>(
        "SELECT code, expires_at FROM email_verification_codes WHERE email = $1",
    )
    .bind(email.as_ref())
    .fetch_optional(pool)
    .await
}

async fn delete_verification_code<'c, E>(executor: E, email: &UserEmail) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query("DELETE FROM email_verification_codes WHERE email = $1")
        .bind(email.as_ref())
        .execute(executor)
        .await?;
    Ok(())
}

#[tracing::instrument(name = "Send a verification email", skip(email_client, code))]
pub async fn send_verification_email(
    email_client: &EmailClient,
    email: &UserEmail,
    code: &VerificationCode,
) -> Result<(), reqwest::Error> {
    email_client
        .send_email(
            email,
            "Verify Your Email - IOPn Early Badge",
            &verification_email_html(code),
        )
        .await
}

fn verification_email_html(code: &VerificationCode) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; background-color: #f4f4f4; margin: 0; padding: 0;">
    <div style="max-width: 600px; margin: 0 auto; background-color: #ffffff;">
        <div style="background-color: #000000; color: #ffffff; padding: 40px; text-align: center;">
            <h1 style="margin: 0; font-size: 32px;">IOPn Early Badge</h1>
            <p style="margin: 10px 0 0 0; font-size: 16px;">Email Verification</p>
        </div>
        <div style="padding: 40px; text-align: center;">
            <h2 style="color: #333;">Verify Your Email Address</h2>
            <p style="color: #666; font-size: 16px; line-height: 24px;">
                Thank you for joining IOPn! Please enter the verification code below to continue earning your Early n-Badge.
            </p>
            <div style="background-color: #f8f8f8; border: 2px solid #e0e0e0; border-radius: 8px; padding: 30px; margin: 30px 0; font-size: 36px; letter-spacing: 10px; font-weight: bold; color: #333333;">
                {code}
            </div>
            <p style="color: #999; font-size: 14px;">This code will expire in {CODE_TTL_MINUTES} minutes.</p>
        </div>
        <div style="padding: 20px; text-align: center; color: #666666; font-size: 14px;">
            <p>If you didn't request this verification, please ignore this email.</p>
        </div>
    </div>
</body>
</html>"#
    )
}
