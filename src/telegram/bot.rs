use super::client::{ChatMemberUpdated, Message, TelegramClient, TelegramUser, Update};
use super::deep_link::{decode_start_parameter, StartPayload};
use crate::configuration::Settings;
use crate::domain::{ReferralCode, UserEmail};
use crate::routes::{link_account, AccountLink};
use crate::startup::get_connection_pool;
use crate::telemetry::spawn_with_tracing;
use reqwest::Url;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const PENDING_TTL: Duration = Duration::from_secs(60 * 60);
const PENDING_PRUNE_THRESHOLD: usize = 50;
const WELCOME_MESSAGE_LIFETIME: Duration = Duration::from_secs(15);
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct PendingVerification {
    email: String,
    username: Option<String>,
    referral_code: Option<String>,
    started_at: Instant,
}

/// Users who asked to be verified but had not joined the channel yet.
#[derive(Debug, Default)]
struct PendingVerifications(HashMap<i64, PendingVerification>);

impl PendingVerifications {
    fn insert(&mut self, user_id: i64, pending: PendingVerification) {
        self.0.insert(user_id, pending);
    }

    fn get(&self, user_id: i64) -> Option<&PendingVerification> {
        self.0.get(&user_id)
    }

    fn remove(&mut self, user_id: i64) {
        self.0.remove(&user_id);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    /// Only kicks in once enough entries pile up.
    fn prune(&mut self, now: Instant) {
        if self.0.len() <= PENDING_PRUNE_THRESHOLD {
            return;
        }
        self.0.retain(|user_id, pending| {
            let keep = now.saturating_duration_since(pending.started_at) <= PENDING_TTL;
            if !keep {
                tracing::info!(telegram_id = user_id, "Dropped a stale pending verification");
            }
            keep
        });
    }
}

/// Verifies channel membership for users arriving through the website's deep link.
pub struct VerificationBot {
    pool: PgPool,
    client: TelegramClient,
    channel_id: String,
    channel_username: String,
    frontend_url: Url,
    pending: PendingVerifications,
}

impl VerificationBot {
    pub fn new(
        pool: PgPool,
        client: TelegramClient,
        channel_id: String,
        channel_username: String,
        frontend_url: Url,
    ) -> Self {
        Self {
            pool,
            client,
            channel_id,
            channel_username,
            frontend_url,
            pending: PendingVerifications::default(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[tracing::instrument(skip_all, fields(update_id = update.update_id))]
    pub async fn handle_update(&mut self, update: Update) -> Result<(), anyhow::Error> {
        if let Some(message) = update.message {
            let is_start = message
                .text
                .as_deref()
                .map_or(false, |text| text.starts_with("/start"));
            if is_start {
                self.handle_start(message).await?;
            }
        } else if let Some(member_update) = update.chat_member {
            self.handle_member_update(member_update).await?;
        }
        Ok(())
    }

    async fn handle_start(&mut self, message: Message) -> Result<(), anyhow::Error> {
        let Some(user) = message.from else {
            return Ok(());
        };
        let payload = message
            .text
            .as_deref()
            .and_then(|text| text.split_whitespace().nth(1))
            .and_then(decode_start_parameter);
        let Some(payload) = payload else {
            self.client
                .send_message(
                    message.chat.id,
                    &format!(
                        "Welcome to IOPn Early Badge Bot!\n\n\
                         Please start the verification process from our website:\n{}",
                        self.frontend_url
                    ),
                    Some(("Go to Website", self.frontend_url.as_str())),
                )
                .await?;
            return Ok(());
        };

        self.pending.prune(Instant::now());

        if self.is_channel_member(user.id).await {
            let linked = self.complete_verification(&user, &payload).await;
            if linked {
                let return_url = self.return_url(payload.referral_code.as_deref());
                self.client
                    .send_message(
                        message.chat.id,
                        "Great news! You're already a member of our channel!\n\n\
                         Your Telegram verification is complete!\n\n\
                         Click below to continue:",
                        Some(("Continue to Next Step", return_url.as_str())),
                    )
                    .await?;
            } else {
                self.client
                    .send_message(
                        message.chat.id,
                        "There was an error completing your verification.\n\
                         Please return to the website and try again.",
                        None,
                    )
                    .await?;
            }
            return Ok(());
        }

        self.pending.insert(
            user.id,
            PendingVerification {
                email: payload.email,
                username: user.username.clone(),
                referral_code: payload.referral_code,
                started_at: Instant::now(),
            },
        );
        let channel_link = format!("https://t.me/{}", self.channel_username);
        self.client
            .send_message(
                message.chat.id,
                "Welcome to IOPn Early Badge verification!\n\n\
                 1. Click the button below to join our channel\n\
                 2. I'll automatically detect when you join\n\
                 3. You'll receive a confirmation message\n\n\
                 I'm watching for you to join...",
                Some(("Join IOPn Channel", channel_link.as_str())),
            )
            .await?;
        Ok(())
    }

    async fn handle_member_update(&mut self, update: ChatMemberUpdated) -> Result<(), anyhow::Error> {
        if update.chat.id.to_string() != self.channel_id {
            return Ok(());
        }
        let user = &update.new_chat_member.user;
        let Some(pending) = self.pending.get(user.id).cloned() else {
            return Ok(());
        };
        if !(update.old_chat_member.has_left() && update.new_chat_member.is_member()) {
            return Ok(());
        }
        tracing::info!(telegram_id = user.id, "Pending user joined the channel");

        let payload = StartPayload {
            email: pending.email,
            referral_code: pending.referral_code,
        };
        let user = TelegramUser {
            username: user.username.clone().or(pending.username),
            ..user.clone()
        };
        if !self.complete_verification(&user, &payload).await {
            tracing::error!(telegram_id = user.id, "Failed to complete the verification");
            return Ok(());
        }

        let return_url = self.return_url(payload.referral_code.as_deref());
        self.client
            .send_message(
                user.id,
                "Awesome! You joined the channel!\n\n\
                 Your Telegram verification is now complete!\n\n\
                 Click below to continue:",
                Some(("Continue to Next Step", return_url.as_str())),
            )
            .await?;

        let welcome = format!(
            "Welcome @{} to IOPn!\n\nYour Early n-Badge verification is complete!",
            user.handle()
        );
        match self.client.send_message(update.chat.id, &welcome, None).await {
            Ok(message) => {
                let client = self.client.clone();
                spawn_with_tracing(async move {
                    tokio::time::sleep(WELCOME_MESSAGE_LIFETIME).await;
                    if let Err(e) = client.delete_message(message.chat.id, message.message_id).await {
                        tracing::warn!(error.cause_chain = ?e, "Failed to delete the welcome message");
                    }
                });
            }
            Err(e) => tracing::warn!(error.cause_chain = ?e, "Failed to post the welcome message"),
        }

        self.pending.remove(user.id);
        tracing::info!(telegram_id = user.id, "Verification completed");
        Ok(())
    }

    /// Lookup failures count as "not a member".
    async fn is_channel_member(&self, user_id: i64) -> bool {
        match self.client.get_chat_member(&self.channel_id, user_id).await {
            Ok(member) => member.is_member(),
            Err(e) => {
                tracing::warn!(error.cause_chain = ?e, "Failed to check channel membership");
                false
            }
        }
    }

    async fn complete_verification(&self, user: &TelegramUser, payload: &StartPayload) -> bool {
        let email = match UserEmail::parse(payload.email.clone()) {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(error = %e, "Deep link carried an invalid email");
                return false;
            }
        };
        let link = AccountLink {
            email,
            telegram_id: user.id.to_string(),
            telegram_username: user.username.clone().unwrap_or_default(),
            is_channel_member: true,
            referral_code: ReferralCode::parse_optional(payload.referral_code.as_deref()),
        };
        match link_account(&self.pool, &link).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error.cause_chain = ?e, "Failed to link the Telegram account");
                false
            }
        }
    }

    fn return_url(&self, referral_code: Option<&str>) -> Url {
        let mut url = self.frontend_url.clone();
        if let Some(code) = referral_code.filter(|code| !code.is_empty()) {
            url.query_pairs_mut().append_pair("ref", code);
        }
        url
    }
}

async fn worker_loop(mut bot: VerificationBot, poll_timeout_seconds: u64) -> Result<(), anyhow::Error> {
    let mut offset: Option<i64> = None;
    loop {
        let updates = match bot.client.get_updates(offset, poll_timeout_seconds).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, "Failed to fetch Telegram updates");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };
        for update in updates {
            offset = Some(update.update_id + 1);
            if let Err(e) = bot.handle_update(update).await {
                tracing::error!(error.cause_chain = ?e, "Failed to handle a Telegram update");
            }
        }
    }
}

pub async fn run_worker_until_stopped(configuration: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&configuration.database);
    let telegram = configuration.telegram;
    let client = TelegramClient::new(
        telegram.api_base_url,
        telegram.bot_token,
        Duration::from_secs(telegram.poll_timeout_seconds + 10),
    );
    let frontend_url = Url::parse(&configuration.application.frontend_url)?;
    tracing::info!(channel_id = %telegram.channel_id, "Starting the Telegram verification bot");
    let bot = VerificationBot::new(
        pool,
        client,
        telegram.channel_id,
        telegram.channel_username,
        frontend_url,
    );
    worker_loop(bot, telegram.poll_timeout_seconds).await
}
