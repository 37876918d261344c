use crate::configuration::{DatabaseSettings, Settings};
use crate::email_client::EmailClient;
use crate::oauth::{DiscordClient, TwitterClient};
use crate::routes::{
    claim, discord_callback, discord_login, discord_status, email_status, force_verify_telegram,
    health, health_check, index, link_simple, link_with_channel_check, referral_summary,
    send_verification, telegram_badge_status, telegram_issue_badge, telegram_login,
    twitter_callback, twitter_login, twitter_status, update_channel_status, user_status,
    verify_and_update, verify_code, verify_telegram_user,
};
use anyhow::Context;
use axum::{
    body::Body,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method, Request,
    },
    routing::{get, post, IntoMakeService},
    Router, Server,
};
use hyper::server::conn::AddrIncoming;
use reqwest::Url;
use secrecy::Secret;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::net::TcpListener;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

type AppServer = Server<AddrIncoming, IntoMakeService<Router>>;

pub struct Application {
    port: u16,
    server: AppServer,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, anyhow::Error> {
        let connection_pool = get_connection_pool(&configuration.database);
        sqlx::migrate!("./migrations")
            .run(&connection_pool)
            .await
            .context("Failed to migrate the database.")?;

        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();
        let server = run(listener, connection_pool, &configuration)?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), hyper::Error> {
        self.server.await
    }
}

pub fn get_connection_pool(configuration: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(configuration.with_db())
}

/// Shared by every handler through `State<Arc<AppState>>`.
pub struct AppState {
    pub connection_pool: PgPool,
    pub email_client: EmailClient,
    pub discord_client: DiscordClient,
    pub discord_invite_link: String,
    pub twitter_client: TwitterClient,
    pub twitter_verify_follow: bool,
    pub twitter_target_id: Option<String>,
    pub twitter_target_username: String,
    pub telegram_bot_token: Secret<String>,
    pub frontend_url: Url,
}

impl AppState {
    pub fn new(connection_pool: PgPool, configuration: &Settings) -> Result<Self, anyhow::Error> {
        let email_settings = &configuration.email_client;
        let sender = email_settings
            .sender()
            .map_err(anyhow::Error::msg)
            .context("Invalid sender email address.")?;
        let email_client = EmailClient::new(
            email_settings.base_url.clone(),
            sender,
            email_settings.authorization_token.clone(),
            email_settings.timeout(),
        );
        let frontend_url = Url::parse(&configuration.application.frontend_url)
            .context("Invalid frontend url.")?;

        Ok(Self {
            connection_pool,
            email_client,
            discord_client: DiscordClient::new(&configuration.discord),
            discord_invite_link: configuration.discord.invite_link.clone(),
            twitter_client: TwitterClient::new(&configuration.twitter),
            twitter_verify_follow: configuration.twitter.verify_follow,
            twitter_target_id: configuration.twitter.target_account_id.clone(),
            twitter_target_username: configuration.twitter.target_account_username.clone(),
            telegram_bot_token: configuration.telegram.bot_token.clone(),
            frontend_url,
        })
    }
}

fn email_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send-verification", post(send_verification))
        .route("/resend-code", post(send_verification))
        .route("/register", post(send_verification))
        .route("/verify-code", post(verify_code))
        .route("/status/:email", get(email_status))
}

fn telegram_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(telegram_login))
        .route("/link-with-channel-check", post(link_with_channel_check))
        .route("/update-channel-status", post(update_channel_status))
        .route("/badge/status/:telegram_id", get(telegram_badge_status))
        .route("/badge/issue", post(telegram_issue_badge))
        .route("/link-simple", post(link_simple))
        .route("/verify-and-update", post(verify_and_update))
        .route("/force-verify-telegram", post(force_verify_telegram))
        .route("/verify/:telegram_id", get(verify_telegram_user))
}

fn discord_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(discord_login))
        .route("/callback", get(discord_callback))
        .route("/status/:discord_id", get(discord_status))
}

fn twitter_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(twitter_login))
        .route("/callback", get(twitter_callback))
        .route("/status/:twitter_id", get(twitter_status))
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status/:email", get(user_status))
        .route("/badge/claim", post(claim))
        .route("/referral/:email", get(referral_summary))
}

/// The configured origins plus the website itself.
fn cors_layer(configuration: &Settings) -> CorsLayer {
    let application = &configuration.application;
    let origins: Vec<HeaderValue> = application
        .allowed_origins
        .iter()
        .chain(std::iter::once(&application.frontend_url))
        .filter_map(|origin| match HeaderValue::from_str(origin.trim_end_matches('/')) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring an invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn run(
    listener: TcpListener,
    connection_pool: PgPool,
    configuration: &Settings,
) -> Result<AppServer, anyhow::Error> {
    let state = Arc::new(AppState::new(connection_pool, configuration)?);

    let app = Router::new()
        .route("/", get(index))
        .route("/health_check", get(health_check))
        .route("/health", get(health))
        .nest("/auth/email", email_routes())
        // Login Widget frontends post with the trailing slash.
        .route("/auth/telegram/", post(telegram_login))
        .nest("/auth/telegram", telegram_routes())
        .nest("/auth/discord", discord_routes())
        .nest("/auth/twitter", twitter_routes())
        .nest("/api", api_routes())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = Uuid::new_v4();
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(cors_layer(configuration))
        .with_state(state);

    let server = Server::from_tcp(listener)?.serve(app.into_make_service());
    Ok(server)
}
