use axum::Json;
use serde_json::{json, Value};

pub async fn index() -> Json<Value> {
    Json(json!({
        "message": "IOPn Early Badge API",
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "auth": {
                "email": "/auth/email/send-verification",
                "twitter": "/auth/twitter/login",
                "discord": "/auth/discord/login",
                "telegram": "/auth/telegram"
            },
            "status": "/api/status/{email}",
            "claim": "/api/badge/claim",
            "referral": "/api/referral/{email}",
            "health": "/health"
        }
    }))
}
