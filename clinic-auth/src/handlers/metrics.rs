use axum::{http::header, response::IntoResponse};

/// Prometheus exposition
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Metrics in text exposition format", body = String)
    ),
    tag = "Observability"
)]
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::services::metrics::get_metrics(),
    )
}
