//! Shared helpers for integration tests: a router over a temporary data dir
//! and small request/response utilities.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use gis_cms::auth::password::hash_password_with_cost;
use gis_cms::config::{Config, StoreBackend};
use gis_cms::db::models::User;
use gis_cms::routes;
use gis_cms::state::AppState;
use gis_cms::store::UserStore;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "s3creto";
pub const BOUNDARY: &str = "gis-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

pub async fn build_test_app() -> TestApp {
    build_test_app_with(StoreBackend::Json).await
}

pub async fn build_test_app_with(backend: StoreBackend) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.backend = backend;
    config.resolve_paths(dir.path().to_path_buf());

    let state = AppState::from_config(config).unwrap();
    state
        .users
        .upsert_user(&User {
            username: USERNAME.into(),
            password_hash: hash_password_with_cost(PASSWORD, 4).unwrap(),
            token: None,
        })
        .await
        .unwrap();

    TestApp {
        router: routes::app(state.clone()),
        state,
        dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Log in as the seeded user and return the token.
    pub async fn login(&self) -> String {
        let response = self
            .send(json_request(
                Method::POST,
                "/users/login",
                None,
                &serde_json::json!({ "username": USERNAME, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let response = self.send(get(uri)).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: &Value,
    ) -> (StatusCode, Value) {
        let response = self.send(json_request(method, uri, token, body)).await;
        let status = response.status();
        (status, body_json(response).await)
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// A `multipart/form-data` request with text fields and files.
pub fn multipart_request(
    method: Method,
    uri: &str,
    token: &str,
    fields: &[(&str, &str)],
    files: &[(&str, &[u8])],
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::AUTHORIZATION, token)
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Response body as JSON, or `Value::Null` when it is not JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}
