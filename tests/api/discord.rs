use crate::helpers::{new_email, parameter, redirect_parameters, spawn_app, TestApp};
use reqwest::Url;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

/// Starts a flow and returns the `state` handed to Discord.
async fn start_flow(app: &TestApp, query: &str) -> String {
    let response = app.get(&format!("/auth/discord/login?{}", query)).await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    let auth_url = Url::parse(body["auth_url"].as_str().unwrap()).unwrap();
    auth_url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("No state in the authorization url.")
}

async fn callback(app: &TestApp, state: &str) -> reqwest::Response {
    app.get(&format!("/auth/discord/callback?code=abc&state={}", state))
        .await
}

async fn mock_discord(app: &TestApp, discord_id: &str, guild_ids: &[&str]) {
    Mock::given(path("/oauth2/token"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "discord-token",
            "token_type": "Bearer"
        })))
        .mount(&app.discord_server)
        .await;
    Mock::given(path("/users/@me"))
        .and(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": discord_id,
            "username": "ursula",
            "global_name": "Ursula"
        })))
        .mount(&app.discord_server)
        .await;
    let guilds: Vec<Value> = guild_ids.iter().map(|id| json!({ "id": id })).collect();
    Mock::given(path("/users/@me/guilds"))
        .and(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(guilds))
        .mount(&app.discord_server)
        .await;
}

#[tokio::test]
async fn login_returns_an_authorization_url() {
    let app = spawn_app().await;
    let email = new_email();

    let response = app
        .get(&format!("/auth/discord/login?email={}", email))
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    let auth_url = Url::parse(body["auth_url"].as_str().unwrap()).unwrap();
    let scope = auth_url
        .query_pairs()
        .find(|(k, _)| k == "scope")
        .map(|(_, v)| v.into_owned());
    assert_eq!(Some("identify guilds".to_string()), scope);
}

#[tokio::test]
async fn login_without_an_email_is_rejected() {
    let app = spawn_app().await;

    let response = app.get("/auth/discord/login").await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn a_guild_member_is_linked_and_redirected_with_success() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    mock_discord(&app, "d-1", &["1", "4242"]).await;

    let state = start_flow(&app, &format!("email={}&ref=abcd1234", email)).await;
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("discord"), parameter(&parameters, "platform"));
    assert_eq!(Some("success"), parameter(&parameters, "status"));
    assert_eq!(Some("Ursula"), parameter(&parameters, "username"));
    assert_eq!(Some("ABCD1234"), parameter(&parameters, "ref"));

    let (discord_id, joined): (Option<String>, bool) =
        sqlx::query_as("SELECT discord_id, discord_joined FROM badge_users WHERE email = $1")
            .bind(&email)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(Some("d-1".to_string()), discord_id);
    assert!(joined);
}

#[tokio::test]
async fn a_non_member_is_linked_but_sent_the_invite() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    mock_discord(&app, "d-2", &["1"]).await;

    let state = start_flow(&app, &format!("email={}", email)).await;
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("not_member"), parameter(&parameters, "status"));
    assert!(parameter(&parameters, "invite").is_some());
    assert!(parameter(&parameters, "ref").is_none());

    let response = app.get("/auth/discord/status/d-2").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["discord_joined"], false);
    assert_eq!(body["username"], "Ursula");
}

#[tokio::test]
async fn a_state_cannot_be_used_twice() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    mock_discord(&app, "d-3", &["4242"]).await;

    let state = start_flow(&app, &format!("email={}", email)).await;
    callback(&app, &state).await;
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("error"), parameter(&parameters, "status"));
    assert_eq!(Some("invalid_state"), parameter(&parameters, "message"));
}

#[tokio::test]
async fn an_unknown_state_is_rejected() {
    let app = spawn_app().await;

    let response = callback(&app, "made-up").await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("invalid_state"), parameter(&parameters, "message"));
}

#[tokio::test]
async fn a_failed_token_exchange_is_reported() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    Mock::given(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&app.discord_server)
        .await;

    let state = start_flow(&app, &format!("email={}", email)).await;
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("token_exchange_failed"), parameter(&parameters, "message"));
}

#[tokio::test]
async fn an_account_linked_to_another_email_is_a_duplicate() {
    let app = spawn_app().await;
    let owner = new_email();
    let other = format!("other-{}", new_email());
    app.verified_user(&owner).await;
    app.verified_user(&other).await;
    mock_discord(&app, "d-4", &["4242"]).await;

    let state = start_flow(&app, &format!("email={}", owner)).await;
    callback(&app, &state).await;
    let state = start_flow(&app, &format!("email={}", other)).await;
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("duplicate"), parameter(&parameters, "status"));
    assert_eq!(Some("Ursula"), parameter(&parameters, "username"));
    let discord_id: Option<String> =
        sqlx::query_scalar("SELECT discord_id FROM badge_users WHERE email = $1")
            .bind(&other)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert!(discord_id.is_none());
}

#[tokio::test]
async fn an_unregistered_email_is_not_created() {
    let app = spawn_app().await;
    mock_discord(&app, "d-5", &["4242"]).await;

    let state = start_flow(&app, &format!("email={}", new_email())).await;
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("user_not_found"), parameter(&parameters, "message"));
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM badge_users")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(0, users);
}

#[tokio::test]
async fn status_of_an_unknown_discord_account_is_a_404() {
    let app = spawn_app().await;

    let response = app.get("/auth/discord/status/nobody").await;

    assert_eq!(404, response.status().as_u16());
}
