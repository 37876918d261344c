use crate::helpers::{new_email, parameter, redirect_parameters, spawn_app, TestApp};
use badge_quest::oauth::pkce_challenge;
use reqwest::Url;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

async fn start_flow(app: &TestApp, email: &str) -> Url {
    let response = app
        .get(&format!("/auth/twitter/login?email={}&ref=ZXCV9876", email))
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    Url::parse(body["auth_url"].as_str().unwrap()).unwrap()
}

async fn callback(app: &TestApp, state: &str) -> reqwest::Response {
    app.get(&format!("/auth/twitter/callback?code=abc&state={}", state))
        .await
}

async fn mock_twitter(app: &TestApp, twitter_id: &str) {
    Mock::given(path("/2/oauth2/token"))
        .and(method("POST"))
        .and(header_exists("Authorization"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "twitter-token",
            "token_type": "bearer"
        })))
        .mount(&app.twitter_server)
        .await;
    Mock::given(path("/2/users/me"))
        .and(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "id": twitter_id, "username": "ursula", "name": "Ursula" }
        })))
        .mount(&app.twitter_server)
        .await;
}

#[tokio::test]
async fn login_uses_an_s256_pkce_challenge() {
    let app = spawn_app().await;

    let auth_url = start_flow(&app, &new_email()).await;

    assert_eq!(
        Some("S256".to_string()),
        query_value(&auth_url, "code_challenge_method")
    );
    let state = query_value(&auth_url, "state").unwrap();
    let verifier: String =
        sqlx::query_scalar("SELECT code_verifier FROM oauth_states WHERE state = $1")
            .bind(&state)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(
        Some(pkce_challenge(&verifier)),
        query_value(&auth_url, "code_challenge")
    );
}

#[tokio::test]
async fn login_without_an_email_is_rejected() {
    let app = spawn_app().await;

    let response = app.get("/auth/twitter/login").await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn the_callback_links_the_account() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    mock_twitter(&app, "t-1").await;

    let auth_url = start_flow(&app, &email).await;
    let state = query_value(&auth_url, "state").unwrap();
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("twitter"), parameter(&parameters, "platform"));
    assert_eq!(Some("success"), parameter(&parameters, "status"));
    assert_eq!(Some("ursula"), parameter(&parameters, "username"));
    assert_eq!(Some("ZXCV9876"), parameter(&parameters, "ref"));

    let response = app.get("/auth/twitter/status/t-1").await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["twitter_followed"], true);
    assert_eq!(body["tasks_completed"]["twitter"], true);
}

#[tokio::test]
async fn an_unknown_email_is_never_created() {
    let app = spawn_app().await;
    mock_twitter(&app, "t-2").await;

    let auth_url = start_flow(&app, &new_email()).await;
    let state = query_value(&auth_url, "state").unwrap();
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("error"), parameter(&parameters, "status"));
    assert_eq!(Some("user_not_found"), parameter(&parameters, "message"));
}

#[tokio::test]
async fn an_account_linked_to_another_email_is_a_duplicate() {
    let app = spawn_app().await;
    let owner = new_email();
    let other = format!("other-{}", new_email());
    app.verified_user(&owner).await;
    app.verified_user(&other).await;
    mock_twitter(&app, "t-3").await;

    let state = query_value(&start_flow(&app, &owner).await, "state").unwrap();
    callback(&app, &state).await;
    let state = query_value(&start_flow(&app, &other).await, "state").unwrap();
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("duplicate"), parameter(&parameters, "status"));
}

#[tokio::test]
async fn a_failed_user_fetch_is_reported() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    Mock::given(path("/2/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "twitter-token"
        })))
        .mount(&app.twitter_server)
        .await;
    Mock::given(path("/2/users/me"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&app.twitter_server)
        .await;

    let state = query_value(&start_flow(&app, &email).await, "state").unwrap();
    let response = callback(&app, &state).await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("user_fetch_failed"), parameter(&parameters, "message"));
}

#[tokio::test]
async fn a_callback_without_a_code_is_an_error() {
    let app = spawn_app().await;
    let state = query_value(&start_flow(&app, &new_email()).await, "state").unwrap();

    let response = app
        .get(&format!("/auth/twitter/callback?state={}", state))
        .await;

    let parameters = redirect_parameters(&response);
    assert_eq!(Some("no_code"), parameter(&parameters, "message"));
}

#[tokio::test]
async fn status_of_an_unknown_twitter_account_is_a_404() {
    let app = spawn_app().await;

    let response = app.get("/auth/twitter/status/nobody").await;

    assert_eq!(404, response.status().as_u16());
}
