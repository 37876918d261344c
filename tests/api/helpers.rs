use badge_quest::configuration::{get_configuration, DatabaseSettings};
use badge_quest::startup::{get_connection_pool, Application};
use badge_quest::telegram::{TelegramClient, VerificationBot};
use badge_quest::telemetry::{get_subscriber, init_subscriber};
use fake::faker::internet::en::SafeEmail;
use fake::Fake;
use once_cell::sync::Lazy;
use reqwest::Url;
use secrecy::Secret;
use serde_json::Value;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Ensure that the `tracing` stack is only initialised once using `once_cell`
static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    };
});

pub const TELEGRAM_BOT_TOKEN: &str = "750165999:test-bot-token";
pub const TELEGRAM_CHANNEL_ID: &str = "-1002400639662";
pub const FRONTEND_URL: &str = "http://localhost:3000/";

pub fn new_email() -> String {
    SafeEmail().fake::<String>().to_lowercase()
}

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
    pub email_server: MockServer,
    pub discord_server: MockServer,
    pub twitter_server: MockServer,
    pub telegram_server: MockServer,
    pub api_client: reqwest::Client,
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.api_client
            .post(&format!("{}{}", &self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.api_client
            .get(&format!("{}{}", &self.address, path))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn send_verification(&self, email: &str) -> reqwest::Response {
        self.post_json(
            "/auth/email/send-verification",
            &serde_json::json!({ "email": email }),
        )
        .await
    }

    pub async fn verify_code(&self, email: &str, code: &str) -> reqwest::Response {
        self.post_json(
            "/auth/email/verify-code",
            &serde_json::json!({ "email": email, "code": code }),
        )
        .await
    }

    /// The code waiting in the verification email sent to `email`.
    pub async fn sent_code(&self, email: &str) -> String {
        let requests = self.email_server.received_requests().await.unwrap();
        let request = requests
            .iter()
            .rev()
            .find(|r| {
                let body: Value = serde_json::from_slice(&r.body).unwrap();
                body["to"] == email
            })
            .expect("No verification email was sent.");
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let html = body["html"].as_str().unwrap();
        extract_code(html)
    }

    pub async fn accept_emails(&self) {
        Mock::given(path("/emails"))
            .and(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.email_server)
            .await;
    }

    /// Runs the whole email verification flow, leaving a user behind.
    pub async fn verified_user(&self, email: &str) {
        let _guard = Mock::given(path("/emails"))
            .and(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount_as_scoped(&self.email_server)
            .await;
        let response = self.send_verification(email).await;
        assert_eq!(200, response.status().as_u16());
        let code = self.sent_code(email).await;
        let response = self.verify_code(email, &code).await;
        assert_eq!(200, response.status().as_u16());
    }

    /// Marks every social task as done without going through the providers.
    pub async fn complete_social_tasks(&self, email: &str) {
        let suffix = Uuid::new_v4().simple().to_string();
        sqlx::query(
            r#"
            UPDATE badge_users
            SET telegram_id = $2, telegram_joined = TRUE,
                discord_id = $3, discord_joined = TRUE,
                twitter_id = $4, twitter_followed = TRUE
            WHERE email = $1
            "#,
        )
        .bind(email)
        .bind(format!("tg-{suffix}"))
        .bind(format!("dc-{suffix}"))
        .bind(format!("tw-{suffix}"))
        .execute(&self.db_pool)
        .await
        .expect("Failed to complete the social tasks.");
    }

    pub async fn referral_code_of(&self, email: &str) -> String {
        sqlx::query_scalar::<_, String>("SELECT referral_code FROM badge_users WHERE email = $1")
            .bind(email)
            .fetch_one(&self.db_pool)
            .await
            .expect("Failed to fetch the referral code.")
    }

    pub fn verification_bot(&self) -> VerificationBot {
        VerificationBot::new(
            self.db_pool.clone(),
            TelegramClient::new(
                self.telegram_server.uri(),
                Secret::new(TELEGRAM_BOT_TOKEN.to_string()),
                Duration::from_secs(2),
            ),
            TELEGRAM_CHANNEL_ID.to_string(),
            "iopndiscussion".to_string(),
            Url::parse(FRONTEND_URL).unwrap(),
        )
    }
}

fn extract_code(html: &str) -> String {
    html.lines()
        .map(str::trim)
        .find(|line| line.len() == 6 && line.chars().all(|c| c.is_ascii_digit()))
        .expect("No verification code in the email body.")
        .to_string()
}

/// Query parameters of a redirect's `Location` header.
pub fn redirect_parameters(response: &reqwest::Response) -> Vec<(String, String)> {
    assert_eq!(307, response.status().as_u16());
    let location = response
        .headers()
        .get("Location")
        .expect("No Location header.")
        .to_str()
        .unwrap();
    let url = Url::parse(location).unwrap();
    assert_eq!("localhost", url.host_str().unwrap());
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

pub fn parameter<'a>(parameters: &'a [(String, String)], key: &str) -> Option<&'a str> {
    parameters
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let email_server = MockServer::start().await;
    let discord_server = MockServer::start().await;
    let twitter_server = MockServer::start().await;
    let telegram_server = MockServer::start().await;

    // Randomise configuration to ensure test isolation
    let configuration = {
        let mut c = get_configuration().expect("Failed to read configuration.");
        c.database.database_name = Uuid::new_v4().to_string();
        c.application.port = 0;
        c.application.frontend_url = FRONTEND_URL.to_string();
        c.email_client.base_url = email_server.uri();
        c.discord.api_base_url = discord_server.uri();
        c.discord.guild_id = "4242".to_string();
        c.discord.bot_token = None;
        c.twitter.api_base_url = twitter_server.uri();
        c.twitter.verify_follow = false;
        c.twitter.target_account_id = None;
        c.telegram.api_base_url = telegram_server.uri();
        c.telegram.bot_token = Secret::new(TELEGRAM_BOT_TOKEN.to_string());
        c.telegram.channel_id = TELEGRAM_CHANNEL_ID.to_string();
        c
    };

    configure_database(&configuration.database).await;

    let application = Application::build(configuration.clone())
        .await
        .expect("Failed to build application.");
    let application_port = application.port();
    let _ = tokio::spawn(application.run_until_stopped());

    let api_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestApp {
        address: format!("http://localhost:{}", application_port),
        db_pool: get_connection_pool(&configuration.database),
        email_server,
        discord_server,
        twitter_server,
        telegram_server,
        api_client,
    }
}

async fn configure_database(config: &DatabaseSettings) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(format!(r#"CREATE DATABASE "{}";"#, config.database_name).as_str())
        .await
        .expect("Failed to create database.");

    // Migrate database
    let connection_pool = PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database");
    connection_pool
}
