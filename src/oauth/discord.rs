use crate::configuration::DiscordSettings;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, Secret};

const SCOPES: &str = "identify guilds";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

impl DiscordUser {
    pub fn display_name(&self) -> &str {
        self.global_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(serde::Deserialize)]
struct PartialGuild {
    id: String,
}

/// Discord OAuth2 and REST API client.
#[derive(Clone)]
pub struct DiscordClient {
    http_client: Client,
    authorize_url: String,
    api_base_url: String,
    client_id: String,
    client_secret: Secret<String>,
    redirect_uri: String,
    guild_id: String,
    bot_token: Option<Secret<String>>,
}

impl DiscordClient {
    pub fn new(settings: &DiscordSettings) -> Self {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_millis(settings.timeout_milliseconds))
            .build()
            .expect("Failed to build the Discord http client");
        Self {
            http_client,
            authorize_url: settings.authorize_url.clone(),
            api_base_url: settings.api_base_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            guild_id: settings.guild_id.clone(),
            bot_token: settings.bot_token.clone(),
        }
    }

    pub fn authorization_url(&self, state: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("state", state),
            ],
        )
    }

    #[tracing::instrument(name = "Exchange Discord authorization code", skip_all)]
    pub async fn exchange_code(&self, code: &str) -> Result<Secret<String>, reqwest::Error> {
        let response: TokenResponse = self
            .http_client
            .post(format!("{}/oauth2/token", self.api_base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Secret::new(response.access_token))
    }

    #[tracing::instrument(name = "Fetch Discord user", skip_all)]
    pub async fn current_user(&self, access_token: &Secret<String>) -> Result<DiscordUser, reqwest::Error> {
        self.http_client
            .get(format!("{}/users/@me", self.api_base_url))
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Membership as seen through the user's own `guilds` scope, falling back
    /// to the bot's view of the guild when a bot token is configured.
    #[tracing::instrument(name = "Check Discord guild membership", skip(self, access_token))]
    pub async fn is_guild_member(
        &self,
        access_token: &Secret<String>,
        user_id: &str,
    ) -> Result<bool, reqwest::Error> {
        let guilds: Vec<PartialGuild> = self
            .http_client
            .get(format!("{}/users/@me/guilds", self.api_base_url))
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::info!(guilds = guilds.len(), "Fetched Discord guilds");
        if guilds.iter().any(|guild| guild.id == self.guild_id) {
            return Ok(true);
        }

        match &self.bot_token {
            Some(bot_token) => {
                let response = self
                    .http_client
                    .get(format!(
                        "{}/guilds/{}/members/{}",
                        self.api_base_url, self.guild_id, user_id
                    ))
                    .header(
                        reqwest::header::AUTHORIZATION,
                        format!("Bot {}", bot_token.expose_secret()),
                    )
                    .send()
                    .await?;
                Ok(response.status().is_success())
            }
            None => Ok(false),
        }
    }
}
