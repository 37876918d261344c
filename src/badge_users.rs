use crate::domain::{ReferralCode, TaskStatus, UserEmail};
use chrono::{DateTime, Utc};
use sqlx::{Acquire, PgPool, Postgres, Transaction};

const REFERRAL_CODE_CONSTRAINT: &str = "badge_users_referral_code_key";
const MAX_REFERRAL_CODE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BadgeUser {
    pub id: i32,
    pub email: String,
    pub telegram_id: Option<String>,
    pub discord_id: Option<String>,
    pub twitter_id: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub telegram_username: Option<String>,
    pub discord_username: Option<String>,
    pub twitter_username: Option<String>,
    pub email_added: bool,
    pub telegram_joined: bool,
    pub discord_joined: bool,
    pub twitter_followed: bool,
    pub badge_issued: bool,
    pub referral_code: Option<String>,
    pub referred_by: Option<String>,
    pub successful_referrals: i32,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub badge_issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BadgeUser {
    pub fn tasks(&self) -> TaskStatus {
        TaskStatus {
            email: self.email_added,
            telegram: self.telegram_joined,
            discord: self.discord_joined,
            twitter: self.twitter_followed,
        }
    }
}

/// Column a user can be looked up by.
#[derive(Debug, Clone, Copy)]
pub enum UserKey<'a> {
    Email(&'a UserEmail),
    TelegramId(&'a str),
    DiscordId(&'a str),
    TwitterId(&'a str),
}

impl<'a> UserKey<'a> {
    fn column(&self) -> &'static str {
        match self {
            UserKey::Email(_) => "email",
            UserKey::TelegramId(_) => "telegram_id",
            UserKey::DiscordId(_) => "discord_id",
            UserKey::TwitterId(_) => "twitter_id",
        }
    }

    fn value(&self) -> &'a str {
        match *self {
            UserKey::Email(email) => email.as_ref(),
            UserKey::TelegramId(v)
            | UserKey::DiscordId(v)
            | UserKey::TwitterId(v) => v,
        }
    }
}

#[tracing::instrument(name = "Fetch badge user", skip(pool))]
pub async fn find_user(pool: &PgPool, key: UserKey<'_>) -> Result<Option<BadgeUser>, sqlx::Error> {
    let query = format!("SELECT * FROM badge_users WHERE {} = $1", key.column());
    sqlx::query_as::<_, BadgeUser>(&query)
        .bind(key.value())
        .fetch_optional(pool)
        .await
}

/// Marks the email as verified, creating the user on first verification and
/// handing out a referral code to users that lack one.
#[tracing::instrument(name = "Save verified email", skip(transaction))]
pub async fn upsert_verified_email(
    transaction: &mut Transaction<'_, Postgres>,
    email: &UserEmail,
) -> Result<BadgeUser, sqlx::Error> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let referral_code = ReferralCode::generate();
        // A failed statement aborts the whole transaction, so each attempt gets a savepoint.
        let mut savepoint = Acquire::begin(&mut *transaction).await?;
        let result = sqlx::query_as::<_, BadgeUser>(
            r#"
            INSERT INTO badge_users (email, email_added, email_verified_at, referral_code)
            VALUES ($1, TRUE, now(), $2)
            ON CONFLICT (email) DO UPDATE SET
                email_added = TRUE,
                email_verified_at = now(),
                referral_code = COALESCE(badge_users.referral_code, EXCLUDED.referral_code)
            RETURNING *
            "#,
        )
        .bind(email.as_ref())
        .bind(referral_code.as_ref())
        .fetch_one(&mut savepoint)
        .await;

        match result {
            Ok(user) => {
                savepoint.commit().await?;
                return Ok(user);
            }
            Err(sqlx::Error::Database(e))
                if e.constraint() == Some(REFERRAL_CODE_CONSTRAINT)
                    && attempt < MAX_REFERRAL_CODE_ATTEMPTS =>
            {
                tracing::warn!("Referral code collision, generating a new one");
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramLink<'a> {
    pub email: &'a UserEmail,
    pub telegram_id: &'a str,
    pub telegram_username: &'a str,
    pub joined: bool,
    pub referred_by: Option<&'a ReferralCode>,
}

/// Links a Telegram account to the user owning `link.email`. `referred_by` is
/// only recorded if the user has none yet. Returns `false` for unknown emails.
#[tracing::instrument(name = "Link Telegram account", skip(executor))]
pub async fn link_telegram<'c, E>(executor: E, link: &TelegramLink<'_>) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE badge_users SET
            telegram_id = $2,
            telegram_username = $3,
            telegram_joined = $4,
            referred_by = COALESCE(referred_by, $5)
        WHERE email = $1
        "#,
    )
    .bind(link.email.as_ref())
    .bind(link.telegram_id)
    .bind(link.telegram_username)
    .bind(link.joined)
    .bind(link.referred_by.map(|c| c.as_ref()))
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Moves a Telegram account to `link.email`, unlinking it from whichever other
/// user held it.
#[tracing::instrument(name = "Relink Telegram account", skip(pool))]
pub async fn relink_telegram(pool: &PgPool, link: &TelegramLink<'_>) -> Result<bool, sqlx::Error> {
    let mut transaction = pool.begin().await?;
    let cleared = sqlx::query(
        r#"
        UPDATE badge_users SET
            telegram_id = NULL,
            telegram_username = NULL,
            telegram_joined = FALSE
        WHERE telegram_id = $1 AND email <> $2
        "#,
    )
    .bind(link.telegram_id)
    .bind(link.email.as_ref())
    .execute(&mut transaction)
    .await?
    .rows_affected();
    if cleared > 0 {
        tracing::info!(cleared, "Removed Telegram account from other users");
    }
    let linked = link_telegram(&mut transaction, link).await?;
    if !linked {
        // Unknown email: dropping the transaction rolls the unlink back.
        return Ok(false);
    }
    transaction.commit().await?;
    Ok(true)
}

#[tracing::instrument(name = "Update Telegram channel status", skip(pool))]
pub async fn set_telegram_joined(
    pool: &PgPool,
    telegram_id: &str,
    joined: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE badge_users SET telegram_joined = $2 WHERE telegram_id = $1")
        .bind(telegram_id)
        .bind(joined)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(name = "Update Telegram profile", skip(pool))]
pub async fn update_telegram_profile(
    pool: &PgPool,
    telegram_id: &str,
    username: &str,
    first_name: &str,
    last_name: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE badge_users SET
            telegram_joined = TRUE,
            telegram_username = $2,
            username = $2,
            first_name = $3,
            last_name = $4
        WHERE telegram_id = $1
        "#,
    )
    .bind(telegram_id)
    .bind(username)
    .bind(first_name)
    .bind(last_name)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(name = "Link Discord account", skip(pool))]
pub async fn link_discord(
    pool: &PgPool,
    email: &UserEmail,
    discord_id: &str,
    discord_username: &str,
    joined: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE badge_users SET
            discord_id = $2,
            discord_username = $3,
            discord_joined = $4
        WHERE email = $1
        "#,
    )
    .bind(email.as_ref())
    .bind(discord_id)
    .bind(discord_username)
    .bind(joined)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[tracing::instrument(name = "Link Twitter account", skip(pool))]
pub async fn link_twitter(
    pool: &PgPool,
    email: &UserEmail,
    twitter_id: &str,
    twitter_username: &str,
    followed: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE badge_users SET
            twitter_id = $2,
            twitter_username = $3,
            twitter_followed = $4
        WHERE email = $1
        "#,
    )
    .bind(email.as_ref())
    .bind(twitter_id)
    .bind(twitter_username)
    .bind(followed)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Issued { badge_number: i32 },
    UnknownUser,
    NotEligible,
    AlreadyClaimed,
}

/// Issues the badge if every task is done, crediting the referrer in the same
/// transaction.
#[tracing::instrument(name = "Claim badge", skip(pool))]
pub async fn claim_badge(pool: &PgPool, key: UserKey<'_>) -> Result<ClaimOutcome, sqlx::Error> {
    let mut transaction = pool.begin().await?;
    let query = format!(
        "SELECT * FROM badge_users WHERE {} = $1 FOR UPDATE",
        key.column()
    );
    let user = match sqlx::query_as::<_, BadgeUser>(&query)
        .bind(key.value())
        .fetch_optional(&mut transaction)
        .await?
    {
        Some(user) => user,
        None => return Ok(ClaimOutcome::UnknownUser),
    };

    if !user.tasks().all_completed() {
        return Ok(ClaimOutcome::NotEligible);
    }
    if user.badge_issued {
        return Ok(ClaimOutcome::AlreadyClaimed);
    }

    sqlx::query("UPDATE badge_users SET badge_issued = TRUE, badge_issued_at = now() WHERE id = $1")
        .bind(user.id)
        .execute(&mut transaction)
        .await?;

    if let Some(referred_by) = user.referred_by.as_deref() {
        credit_referrer(&mut transaction, referred_by, user.id).await?;
    }

    transaction.commit().await?;
    Ok(ClaimOutcome::Issued {
        badge_number: user.id,
    })
}

#[tracing::instrument(name = "Credit referrer", skip(transaction))]
async fn credit_referrer(
    transaction: &mut Transaction<'_, Postgres>,
    referral_code: &str,
    referee_id: i32,
) -> Result<(), sqlx::Error> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO referral_rewards (referrer_id, referee_id)
        SELECT id, $2 FROM badge_users
        WHERE referral_code = $1 AND id <> $2
        ON CONFLICT (referee_id) DO NOTHING
        "#,
    )
    .bind(referral_code)
    .bind(referee_id)
    .execute(&mut *transaction)
    .await?
    .rows_affected();

    if inserted > 0 {
        sqlx::query(
            "UPDATE badge_users SET successful_referrals = successful_referrals + 1 \
            WHERE referral_code = $1",
        )
        .bind(referral_code)
        .execute(&mut *transaction)
        .await?;
    } else {
        tracing::info!("No referral reward granted");
    }
    Ok(())
}
