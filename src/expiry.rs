use std::time::Duration;

use crate::{configuration::Settings, startup::get_connection_pool};
use sqlx::PgPool;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[tracing::instrument(skip_all)]
pub async fn expire_verification_codes(pool: &PgPool) -> Result<u64, anyhow::Error> {
    let result = sqlx::query("DELETE FROM email_verification_codes WHERE expires_at < now()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Drops OAuth states whose flow was abandoned.
#[tracing::instrument(skip_all)]
pub async fn expire_oauth_states(pool: &PgPool, ttl_seconds: u32) -> Result<u64, anyhow::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM oauth_states
        WHERE
            EXTRACT(EPOCH FROM (now() - created_at)) > $1
        "#,
    )
    .bind(f64::from(ttl_seconds))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

async fn worker_loop(pool: PgPool, oauth_state_ttl_seconds: u32) -> Result<(), anyhow::Error> {
    loop {
        if let Err(e) = expire_verification_codes(&pool).await {
            tracing::error!(error.cause_chain = ?e, "Failed to expire verification codes");
        }
        if let Err(e) = expire_oauth_states(&pool, oauth_state_ttl_seconds).await {
            tracing::error!(error.cause_chain = ?e, "Failed to expire OAuth states");
        }
        tokio::time::sleep(SWEEP_INTERVAL).await;
    }
}

pub async fn run_worker_until_stopped(configuration: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&configuration.database);
    let ttl = configuration.application.oauth_state_ttl_seconds;
    worker_loop(pool, ttl).await
}
