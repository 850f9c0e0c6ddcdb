// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

pub mod health;
pub mod oauth;

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/api/config", get(oauth::get_config))
        .route("/api/oauth/exchange-code", post(oauth::exchange_code))
        .route("/api/oauth/refresh-token", post(oauth::refresh_token))
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        oauth::get_config,
        oauth::exchange_code,
        oauth::refresh_token
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            oauth::ClientConfigResponse,
            oauth::ExchangeCodeRequest,
            oauth::ExchangeCodeResponse,
            oauth::RefreshTokenRequest,
            oauth::RefreshTokenResponse
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "OAuth", description = "Server-side OAuth token exchange")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn unconfigured() -> AppState {
        AppState::new(ProxyConfig {
            host: "127.0.0.1".into(),
            port: 0,
            environment: "test".into(),
            google_client_id: None,
            google_client_secret: None,
            google_token_url: "http://localhost/token".into(),
        })
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let app = router(unconfigured());
        let _ = app.into_make_service();
    }

    #[tokio::test]
    async fn missing_refresh_token_is_rejected_as_json() {
        let response = router(unconfigured())
            .oneshot(
                Request::post("/api/oauth/refresh-token")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"Missing refresh_token"}"#);
    }

    #[tokio::test]
    async fn liveness_route_answers() {
        let response = router(unconfigured())
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
