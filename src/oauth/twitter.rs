use crate::configuration::TwitterSettings;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};

const SCOPES: &str = "tweet.read users.read follows.read";

/// PKCE S256 challenge for a code verifier.
pub fn pkce_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TwitterUser {
    pub id: String,
    pub username: String,
}

#[derive(serde::Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(serde::Deserialize)]
struct FollowingPage {
    #[serde(default)]
    data: Vec<TwitterUser>,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Twitter OAuth 2.0 (PKCE) and v2 API client.
#[derive(Clone)]
pub struct TwitterClient {
    http_client: Client,
    authorize_url: String,
    api_base_url: String,
    client_id: String,
    client_secret: Secret<String>,
    redirect_uri: String,
}

impl TwitterClient {
    pub fn new(settings: &TwitterSettings) -> Self {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_millis(settings.timeout_milliseconds))
            .build()
            .expect("Failed to build the Twitter http client");
        Self {
            http_client,
            authorize_url: settings.authorize_url.clone(),
            api_base_url: settings.api_base_url.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_uri: settings.redirect_uri.clone(),
        }
    }

    pub fn authorization_url(&self, state: &str, code_verifier: &str) -> Result<Url, url::ParseError> {
        let challenge = pkce_challenge(code_verifier);
        Url::parse_with_params(
            &self.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", SCOPES),
                ("state", state),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
    }

    #[tracing::instrument(name = "Exchange Twitter authorization code", skip_all)]
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<Secret<String>, reqwest::Error> {
        let response: TokenResponse = self
            .http_client
            .post(format!("{}/2/oauth2/token", self.api_base_url))
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code_verifier", code_verifier),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Secret::new(response.access_token))
    }

    #[tracing::instrument(name = "Fetch Twitter user", skip_all)]
    pub async fn current_user(&self, access_token: &Secret<String>) -> Result<TwitterUser, reqwest::Error> {
        let envelope: DataEnvelope<TwitterUser> = self
            .http_client
            .get(format!("{}/2/users/me", self.api_base_url))
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(envelope.data)
    }

    /// Looks for `target_id` in the first page of accounts `user_id` follows.
    #[tracing::instrument(name = "Check Twitter follow", skip(self, access_token))]
    pub async fn follows(
        &self,
        access_token: &Secret<String>,
        user_id: &str,
        target_id: &str,
    ) -> Result<bool, reqwest::Error> {
        let page: FollowingPage = self
            .http_client
            .get(format!("{}/2/users/{}/following", self.api_base_url, user_id))
            .query(&[("max_results", "1000")])
            .bearer_auth(access_token.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.data.iter().any(|account| account.id == target_id))
    }
}
