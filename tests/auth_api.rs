//! Integration tests for login, token validation, logout and write protection.

mod common;

use axum::http::{Method, StatusCode};
use common::{build_test_app, PASSWORD, USERNAME};
use serde_json::json;

#[tokio::test]
async fn login_validate_logout_cycle() {
    let app = build_test_app().await;
    let token = app.login().await;

    let (status, json) = app
        .call(Method::POST, "/users/validate", None, &json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);

    let (status, json) = app
        .call(Method::POST, "/users/logout", None, &json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, json) = app
        .call(Method::POST, "/users/validate", None, &json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Token inválido");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let app = build_test_app().await;

    for (username, password) in [(USERNAME, "nope"), ("ghost", PASSWORD)] {
        let (status, json) = app
            .call(
                Method::POST,
                "/users/login",
                None,
                &json!({ "username": username, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "Credenciales inválidas");
    }
}

#[tokio::test]
async fn new_login_invalidates_previous_token() {
    let app = build_test_app().await;
    let first = app.login().await;
    let second = app.login().await;
    assert_ne!(first, second);

    let (status, _) = app
        .call(Method::POST, "/users/validate", None, &json!({ "token": first }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::POST, "/users/validate", Some(&second), &json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_with_unknown_token_still_succeeds() {
    let app = build_test_app().await;
    let (status, json) = app
        .call(Method::POST, "/users/logout", None, &json!({ "token": "whatever" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn validate_without_token_is_rejected() {
    let app = build_test_app().await;
    let (status, json) = app
        .call(Method::POST, "/users/validate", None, &json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Token requerido");
}

#[tokio::test]
async fn writes_require_a_valid_token() {
    let app = build_test_app().await;
    let body = json!({ "title": "Geólogo", "category": "Campo" });

    for resource in ["projects", "news", "jobs"] {
        let uri = format!("/{resource}");
        let (status, json) = app.call(Method::POST, &uri, None, &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "POST {uri}");
        assert_eq!(json["error"], "Token requerido");

        let (status, json) = app.call(Method::POST, &uri, Some("forged"), &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "POST {uri}");
        assert_eq!(json["error"], "Token inválido");

        let (status, _) = app
            .call(
                Method::POST,
                &format!("{uri}/categories"),
                None,
                &json!({ "name": "a", "color": "#000" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Reads stay public.
    let (status, _) = app.get_json("/jobs").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logged_out_token_cannot_write() {
    let app = build_test_app().await;
    let token = app.login().await;
    app.call(Method::POST, "/users/logout", Some(&token), &json!({}))
        .await;

    let (status, json) = app
        .call(
            Method::POST,
            "/jobs",
            Some(&token),
            &json!({ "title": "Geólogo", "category": "Campo" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Token inválido");
}
