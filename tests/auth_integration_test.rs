mod common;

use axum::http::{header, Method, Request, StatusCode};
use common::{response_json, TestApp, ADMIN_EMAIL, USER_PASSWORD};
use serde_json::json;

#[tokio::test]
async fn user_routes_require_a_session() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/user/profile", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Unauthorized");
    assert!(body["timestamp"].as_str().is_some());

    let garbage = app
        .request(Method::GET, "/user/profile", None, Some("not-a-token"))
        .await;
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_authenticates_user_routes() {
    let app = TestApp::new().await;
    let (user_id, token) = app.signup_and_login("cookie@example.com").await;

    let request = Request::builder()
        .method(Method::GET)
        .uri("/user/profile")
        .header(header::COOKIE, format!("theme=dark; Authorise={}", token))
        .body(axum::body::Body::empty())
        .expect("request");
    let response = app.send_request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["id"], user_id.to_string());
    assert_eq!(body["data"]["wallet"], 0);
}

#[tokio::test]
async fn login_sets_the_session_cookie() {
    let app = TestApp::new().await;
    app.signup_and_login("set-cookie@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/login",
            Some(json!({ "email": "set-cookie@example.com", "password": USER_PASSWORD })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("session cookie");
    assert!(cookie.starts_with("Authorise="));
    assert!(cookie.contains("HttpOnly"));

    let logout = app.request(Method::POST, "/logout", None, None).await;
    let cleared = logout
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("cleared cookie");
    assert!(cleared.contains("Max-Age=0"));
}

#[tokio::test]
async fn wrong_password_and_duplicate_signup_are_rejected() {
    let app = TestApp::new().await;
    app.signup_and_login("dupe@example.com").await;

    let wrong = app
        .request(
            Method::POST,
            "/login",
            Some(json!({ "email": "dupe@example.com", "password": "wrong-password" })),
            None,
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let again = app
        .request(
            Method::POST,
            "/signup",
            Some(json!({
                "name": "Second",
                "email": "DUPE@example.com",
                "phone": "9123456780",
                "password": USER_PASSWORD,
            })),
            None,
        )
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_signup_reports_field_details() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/signup",
            Some(json!({
                "name": "Bad Input",
                "email": "not-an-email",
                "phone": "12",
                "password": "short",
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert!(body["details"]["email"].is_array());
    assert!(body["details"]["phone"].is_array());
    assert!(body["details"]["password"].is_array());
}

#[tokio::test]
async fn roles_do_not_cross() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (_, user) = app.signup_and_login("role@example.com").await;

    let admin_on_user = app
        .request(Method::GET, "/user/profile", None, Some(&admin))
        .await;
    assert_eq!(admin_on_user.status(), StatusCode::FORBIDDEN);

    let user_on_admin = app
        .request(Method::GET, "/admin/users", None, Some(&user))
        .await;
    assert_eq!(user_on_admin.status(), StatusCode::FORBIDDEN);

    let admin_listing = app
        .request(Method::GET, "/admin/users", None, Some(&admin))
        .await;
    assert_eq!(admin_listing.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_login_rejects_user_credentials() {
    let app = TestApp::new().await;
    app.admin_token().await;
    app.signup_and_login("not-admin@example.com").await;

    let response = app
        .request(
            Method::POST,
            "/admin/login",
            Some(json!({ "email": "not-admin@example.com", "password": USER_PASSWORD })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .request(
            Method::POST,
            "/admin/login",
            Some(json!({ "email": ADMIN_EMAIL, "password": "nope-nope-nope" })),
            None,
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn blocked_user_is_locked_out_until_unblocked() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (user_id, token) = app.signup_and_login("blocked@example.com").await;

    let blocked = app
        .request(
            Method::PATCH,
            &format!("/admin/users/{}/block", user_id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(blocked.status(), StatusCode::OK);
    assert_eq!(response_json(blocked).await["data"]["is_blocked"], true);

    // Existing sessions stop working
    let profile = app
        .request(Method::GET, "/user/profile", None, Some(&token))
        .await;
    assert_eq!(profile.status(), StatusCode::FORBIDDEN);

    let login = app
        .request(
            Method::POST,
            "/login",
            Some(json!({ "email": "blocked@example.com", "password": USER_PASSWORD })),
            None,
        )
        .await;
    assert_eq!(login.status(), StatusCode::UNAUTHORIZED);

    let unblocked = app
        .request(
            Method::PATCH,
            &format!("/admin/users/{}/block", user_id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(response_json(unblocked).await["data"]["is_blocked"], false);

    let profile = app
        .request(Method::GET, "/user/profile", None, Some(&token))
        .await;
    assert_eq!(profile.status(), StatusCode::OK);
}

#[tokio::test]
async fn public_routes_need_no_session() {
    let app = TestApp::new().await;

    let health = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(response_json(health).await["data"]["status"], "healthy");

    let products = app.request(Method::GET, "/products", None, None).await;
    assert_eq!(products.status(), StatusCode::OK);

    let response = app.request(Method::GET, "/status", None, None).await;
    let body = response_json(response).await;
    assert_eq!(body["data"]["payments"]["razorpay"], true);
    assert!(body["meta"]["request_id"].as_str().is_some());
}
