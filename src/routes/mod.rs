pub mod categories;
pub mod entities;
pub mod news;
pub mod projects;
pub mod users;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::{Extension, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{ImageBackend, ServerConfig};
use crate::resources::ResourceKind;
use crate::state::AppState;

/// The full application: one CRUD router per collection plus the
/// resource-specific extras, users, and static image files.
pub fn app(state: AppState) -> Router {
    let mut router = Router::new();
    for kind in ResourceKind::ALL {
        router = router.merge(resource_router(kind));
    }
    router = router
        .merge(projects::router())
        .merge(news::router())
        .merge(users::router())
        .nest_service(
            "/public",
            ServeDir::new(state.config.data_dir.join("public")),
        );

    if state.config.images.backend == ImageBackend::Local {
        router = router.nest_service("/images", ServeDir::new(state.config.images_path()));
    }

    router
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.server))
        .with_state(state)
}

/// `GET|POST /{kind}`, `PUT|DELETE /{kind}/{id}` and the category routes.
/// Handlers read which collection they serve from the `ResourceKind` extension.
fn resource_router(kind: ResourceKind) -> Router<AppState> {
    let base = format!("/{}", kind.key());
    Router::new()
        .route(&base, get(entities::list).post(entities::create))
        .route(&format!("{base}/{{id}}"), put(entities::update).delete(entities::remove))
        .route(&format!("{base}/categories"), post(categories::create))
        .route(
            &format!("{base}/categories/{{id}}"),
            put(categories::update).delete(categories::remove),
        )
        .layer(Extension(kind))
}

/// Browsers reject credentialed responses for a wildcard origin, so `"*"`
/// allows any origin without credentials.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    if config.cors_origins.iter().any(|origin| origin.trim() == "*") {
        if config.cors_origins.len() > 1 {
            tracing::warn!("CORS wildcard configured; other origins are redundant");
        }
        return base.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    base.allow_origin(origins).allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn cors_router(origins: &[&str]) -> Router {
        let config = ServerConfig {
            cors_origins: origins.iter().map(|o| o.to_string()).collect(),
            ..ServerConfig::default()
        };
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(&config))
    }

    async fn allowed_origin(router: Router, origin: &str) -> (Option<String>, bool) {
        let request = Request::builder()
            .uri("/")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let headers = response.headers();
        (
            headers
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .map(|v| v.to_str().unwrap().to_string()),
            headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
        )
    }

    #[tokio::test]
    async fn wildcard_origin_allows_any_without_credentials() {
        let router = cors_router(&["*", "https://gis.example"]);
        let (origin, credentials) = allowed_origin(router, "https://elsewhere.example").await;
        assert_eq!(origin.as_deref(), Some("*"));
        assert!(!credentials);
    }

    #[tokio::test]
    async fn listed_origins_allow_credentials() {
        let router = cors_router(&["https://gis.example", "not a header\n"]);
        let (origin, credentials) = allowed_origin(router.clone(), "https://gis.example").await;
        assert_eq!(origin.as_deref(), Some("https://gis.example"));
        assert!(credentials);

        let (origin, _) = allowed_origin(router, "https://elsewhere.example").await;
        assert_eq!(origin, None);
    }
}
