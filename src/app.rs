use std::net::SocketAddr;
use std::time::Duration;

use axum::{error_handling::HandleErrorLayer, routing::get, BoxError, Router};
use tower::{timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::state::AppState;
use crate::users;

pub fn build_app(state: AppState) -> Router {
    let timeout = state.config.request_timeout;
    let router = Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .nest("/users", users::router())
                .route("/health", get(|| async { "ok" })),
        )
        .fallback(|| async { AppError::not_found("Route not found") })
        .with_state(state);

    with_timeout(router, timeout)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

/// Bounds every request; an elapsed deadline renders as a 408 envelope.
fn with_timeout(router: Router, timeout: Duration) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_middleware_error))
            .layer(TimeoutLayer::new(timeout)),
    )
}

async fn handle_middleware_error(err: BoxError) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!(error = %err, "request timed out");
        AppError::Timeout
    } else {
        AppError::Internal(anyhow::anyhow!("middleware error: {err}"))
    }
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn slow_request_gets_timeout_envelope() {
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                "late"
            }),
        );
        let app = with_timeout(slow, Duration::from_millis(20));

        let res = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["statusCode"], 408);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unknown_route_gets_not_found_envelope() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::builder().uri("/api/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Route not found");
        assert_eq!(body["success"], false);
    }
}
