use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Discord,
    Twitter,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Discord => "discord",
            OAuthProvider::Twitter => "twitter",
        }
    }
}

/// What an authorization flow was started with, recovered from its `state`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingAuthorization {
    pub email: String,
    pub referral_code: Option<String>,
    pub code_verifier: Option<String>,
}

/// Random alphanumeric token, used for OAuth `state` values.
pub fn generate_token(length: usize) -> String {
    let mut rng = thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(length)
        .collect()
}

#[tracing::instrument(name = "Store OAuth state", skip(pool, state, code_verifier))]
pub async fn store_state(
    pool: &PgPool,
    provider: OAuthProvider,
    state: &str,
    email: &str,
    referral_code: Option<&str>,
    code_verifier: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO oauth_states (state, provider, email, referral_code, code_verifier, created_at)
        VALUES ($1, $2, $3, $4, $5, now())
        "#,
    )
    .bind(state)
    .bind(provider.as_str())
    .bind(email)
    .bind(referral_code)
    .bind(code_verifier)
    .execute(pool)
    .await?;
    Ok(())
}

/// States are single use: the row is deleted as it is read.
#[tracing::instrument(name = "Consume OAuth state", skip(pool, state))]
pub async fn consume_state(
    pool: &PgPool,
    provider: OAuthProvider,
    state: &str,
) -> Result<Option<PendingAuthorization>, sqlx::Error> {
    sqlx::query_as::<_, PendingAuthorization>(
        r#"
        DELETE FROM oauth_states
        WHERE state = $1 AND provider = $2
        RETURNING email, referral_code, code_verifier
        "#,
    )
    .bind(state)
    .bind(provider.as_str())
    .fetch_optional(pool)
    .await
}
