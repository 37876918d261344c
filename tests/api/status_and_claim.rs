use crate::helpers::{new_email, spawn_app, TestApp};
use serde_json::{json, Value};

async fn claim(app: &TestApp, email: &str) -> reqwest::Response {
    app.post_json("/api/badge/claim", &json!({ "email": email }))
        .await
}

async fn successful_referrals(app: &TestApp, email: &str) -> i32 {
    sqlx::query_scalar("SELECT successful_referrals FROM badge_users WHERE email = $1")
        .bind(email)
        .fetch_one(&app.db_pool)
        .await
        .unwrap()
}

async fn link_telegram_with_referral(app: &TestApp, email: &str, telegram_id: &str, code: &str) {
    let response = app
        .post_json(
            "/auth/telegram/link-with-channel-check",
            &json!({
                "email": email,
                "telegram_id": telegram_id,
                "telegram_username": "referee",
                "is_channel_member": true,
                "referral_code": code,
            }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn status_of_an_unknown_user_has_nothing_done() {
    let app = spawn_app().await;
    let email = new_email();

    let response = app.get(&format!("/api/status/{}", email)).await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["exists"], false);
    assert_eq!(body["can_claim"], false);
    assert_eq!(body["badge_issued"], false);
    assert_eq!(
        body["tasks"],
        json!({ "email": false, "telegram": false, "discord": false, "twitter": false })
    );
    assert!(body.get("user_data").is_none());
}

#[tokio::test]
async fn status_reports_progress_and_linked_accounts() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;

    let response = app.get(&format!("/api/status/{}", email)).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["exists"], true);
    assert_eq!(body["tasks"]["email"], true);
    assert_eq!(body["can_claim"], false);
    assert_eq!(body["user_data"]["discord_username"], Value::Null);

    app.complete_social_tasks(&email).await;
    let response = app.get(&format!("/api/status/{}", email)).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["can_claim"], true);
}

#[tokio::test]
async fn claim_without_an_email_is_rejected() {
    let app = spawn_app().await;

    let response = app.post_json("/api/badge/claim", &json!({})).await;

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Email required");
}

#[tokio::test]
async fn claim_with_incomplete_tasks_is_rejected() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;

    let response = claim(&app, &email).await;

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Not all tasks completed");
}

#[tokio::test]
async fn claim_for_an_unknown_user_is_rejected_as_not_eligible() {
    let app = spawn_app().await;

    let response = claim(&app, &new_email()).await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn claim_issues_the_badge_once() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    app.complete_social_tasks(&email).await;

    let response = claim(&app, &email).await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["badge_number"].is_number());

    let response = claim(&app, &email).await;
    assert_eq!(409, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["detail"], "Badge already claimed");

    let response = app.get(&format!("/api/status/{}", email)).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["badge_issued"], true);
}

#[tokio::test]
async fn claiming_credits_the_referrer_exactly_once() {
    let app = spawn_app().await;
    let referrer = new_email();
    let referee = format!("referee-{}", new_email());
    app.verified_user(&referrer).await;
    app.verified_user(&referee).await;
    let code = app.referral_code_of(&referrer).await;

    link_telegram_with_referral(&app, &referee, "5550001", &code).await;
    app.complete_social_tasks(&referee).await;

    assert_eq!(200, claim(&app, &referee).await.status().as_u16());
    assert_eq!(409, claim(&app, &referee).await.status().as_u16());

    assert_eq!(1, successful_referrals(&app, &referrer).await);
    let rewards: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM referral_rewards")
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(1, rewards);
}

#[tokio::test]
async fn the_first_referral_code_sticks() {
    let app = spawn_app().await;
    let first = new_email();
    let second = format!("second-{}", new_email());
    let referee = format!("referee-{}", new_email());
    for email in [&first, &second, &referee] {
        app.verified_user(email).await;
    }

    link_telegram_with_referral(&app, &referee, "5550002", &app.referral_code_of(&first).await)
        .await;
    link_telegram_with_referral(&app, &referee, "5550002", &app.referral_code_of(&second).await)
        .await;
    app.complete_social_tasks(&referee).await;
    claim(&app, &referee).await;

    assert_eq!(1, successful_referrals(&app, &first).await);
    assert_eq!(0, successful_referrals(&app, &second).await);
}

#[tokio::test]
async fn a_user_cannot_refer_themselves() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    let code = app.referral_code_of(&email).await;

    link_telegram_with_referral(&app, &email, "5550003", &code).await;
    app.complete_social_tasks(&email).await;
    assert_eq!(200, claim(&app, &email).await.status().as_u16());

    assert_eq!(0, successful_referrals(&app, &email).await);
}

#[tokio::test]
async fn referral_summary_carries_the_share_link() {
    let app = spawn_app().await;
    let email = new_email();
    app.verified_user(&email).await;
    let code = app.referral_code_of(&email).await;

    let response = app.get(&format!("/api/referral/{}", email)).await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["referral_code"], code.as_str());
    assert_eq!(
        body["referral_link"],
        format!("http://localhost:3000/?ref={}", code)
    );
    assert_eq!(body["successful_referrals"], 0);
}

#[tokio::test]
async fn referral_summary_for_an_unknown_user_is_a_404() {
    let app = spawn_app().await;

    let response = app.get(&format!("/api/referral/{}", new_email())).await;

    assert_eq!(404, response.status().as_u16());
}
