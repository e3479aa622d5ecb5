pub mod health;

use std::sync::Arc;

use axum::Router;
use axum::extract::MatchedPath;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::application::services::business::BusinessService;

/// HTTP entry layer. Owns the route table and reaches business logic only
/// through [`BusinessService`].
#[derive(Clone)]
pub struct Handler {
    service: Arc<dyn BusinessService>,
}

impl Handler {
    pub fn new(service: Arc<dyn BusinessService>) -> Self {
        Self { service }
    }

    /// Attaches the route table; each route module gets the service as its
    /// router state.
    pub fn register_routes(&self, router: Router) -> Router {
        router.merge(health::routes(self.service.clone()))
    }
}

/// Route table wrapped in request tracing and panic recovery.
pub fn router(handler: &Handler) -> Router {
    handler
        .register_routes(Router::new())
        .layer(CatchPanicLayer::new())
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &http::Request<_>| {
                let method = req.method().clone();
                let uri = req.uri().clone();
                let matched = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
                tracing::info_span!("http", %method, %uri, matched_path = %matched)
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::business::Service;
    use axum::body::{Body, to_bytes};
    use http::{Method, Request, StatusCode, header};
    use tower::ServiceExt;

    fn handler() -> Handler {
        Handler::new(Arc::new(Service::new(None)))
    }

    async fn send(req: Request<Body>) -> (StatusCode, String) {
        let res = router(&handler()).oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_returns_ok_body() {
        let (status, body) = send(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "OK");
        assert_eq!(json["message"], "Service is healthy");
    }

    #[tokio::test]
    async fn health_ignores_headers_and_body() {
        let (status, body) = send(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, "Bearer whatever")
                .body(Body::from(r#"{"unexpected":true}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("OK"));
        assert!(body.contains("Service is healthy"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, _) = send(
            Request::builder()
                .uri("/users")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn register_routes_extends_an_existing_router() {
        let base = Router::new().route("/ping", axum::routing::get(|| async { "pong" }));
        let app = handler().register_routes(base);

        let ping = app
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ping.status(), StatusCode::OK);
        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
