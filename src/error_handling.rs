use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

/// Error body shape shared by every JSON endpoint: `{"detail": "..."}`.
pub fn detail_response(status: StatusCode, detail: impl std::fmt::Display) -> Response {
    (
        status,
        Json(serde_json::json!({ "detail": detail.to_string() })),
    )
        .into_response()
}
