use axum::http::StatusCode;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Ready as soon as the router is serving; credentials are checked per request.
pub async fn readyz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
