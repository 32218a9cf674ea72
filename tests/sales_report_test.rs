mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use serde_json::json;
use storefront_api::services::reports::REPORT_DATE_FORMAT;

async fn cod_order(app: &TestApp, token: &str, product_id: uuid::Uuid, quantity: i32) -> String {
    let address_id = app.add_address(token).await;
    app.add_to_cart(token, product_id, quantity).await;
    let placed = app.place_order(token, address_id, "cod").await;
    assert_eq!(placed.status(), StatusCode::CREATED);
    response_json(placed).await["data"]["order"]["id"]
        .as_str()
        .expect("order id")
        .to_string()
}

async fn confirm(app: &TestApp, admin: &str, order_id: &str) {
    let response = app
        .request(
            Method::PATCH,
            &format!("/admin/order/update/{}", order_id),
            Some(json!({ "status": "confirmed" })),
            Some(admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn only_confirmed_orders_count_as_sales() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let product = app.seed_product("Report Lamp", 300, 20).await;
    let (_, token) = app.signup_and_login("report@example.com").await;

    let first = cod_order(&app, &token, product.id, 1).await;
    let second = cod_order(&app, &token, product.id, 2).await;
    cod_order(&app, &token, product.id, 1).await;
    confirm(&app, &admin, &first).await;
    confirm(&app, &admin, &second).await;

    let day = response_json(
        app.request(Method::GET, "/admin/salesreport/period/day", None, Some(&admin))
            .await,
    )
    .await;
    assert_eq!(day["data"]["total_sales"], 900);
    assert_eq!(day["data"]["total_orders"], 2);
    assert_eq!(
        day["data"]["average_order_value"]
            .as_str()
            .and_then(|v| v.parse::<f64>().ok()),
        Some(450.0)
    );

    let today = Utc::now().format(REPORT_DATE_FORMAT).to_string();
    let by_date = response_json(
        app.request(
            Method::GET,
            &format!("/admin/salesreport/date/{}/{}", today, today),
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(by_date["data"]["total_sales"], 900);
    assert_eq!(by_date["data"]["start"], today.as_str());

    let by_cod = response_json(
        app.request(
            Method::GET,
            &format!("/admin/salesreport/payment/{}/{}/cod", today, today),
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(by_cod["data"]["payment_method"], "cod");
    assert_eq!(by_cod["data"]["total_orders"], 2);

    let by_wallet = response_json(
        app.request(
            Method::GET,
            &format!("/admin/salesreport/payment/{}/{}/wallet", today, today),
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(by_wallet["data"]["total_orders"], 0);
    assert_eq!(by_wallet["data"]["total_sales"], 0);
}

#[tokio::test]
async fn past_ranges_exclude_todays_orders() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let product = app.seed_product("Past Lamp", 500, 5).await;
    let (_, token) = app.signup_and_login("past@example.com").await;
    let order_id = cod_order(&app, &token, product.id, 1).await;
    confirm(&app, &admin, &order_id).await;

    let start = (Utc::now() - Duration::days(10)).format(REPORT_DATE_FORMAT).to_string();
    let end = (Utc::now() - Duration::days(2)).format(REPORT_DATE_FORMAT).to_string();
    let report = response_json(
        app.request(
            Method::GET,
            &format!("/admin/salesreport/date/{}/{}", start, end),
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(report["data"]["total_orders"], 0);
}

#[tokio::test]
async fn bad_report_parameters_are_rejected() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;

    for uri in [
        "/admin/salesreport/period/fortnight",
        "/admin/salesreport/date/2024-03-01/2024-03-07",
        "/admin/salesreport/date/10-3-2024/1-3-2024",
        "/admin/salesreport/payment/1-3-2024/7-3-2024/cheque",
    ] {
        let response = app.request(Method::GET, uri, None, Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn dashboard_summarises_the_store() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let lamp = app.seed_product("Dash Lamp", 200, 5).await;
    app.seed_product("Dash Chair", 900, 0).await;
    let (_, token) = app.signup_and_login("dash@example.com").await;

    let confirmed = cod_order(&app, &token, lamp.id, 2).await;
    cod_order(&app, &token, lamp.id, 1).await;
    confirm(&app, &admin, &confirmed).await;

    let dashboard = app
        .request(Method::GET, "/admin/dashboard", None, Some(&admin))
        .await;
    assert_eq!(dashboard.status(), StatusCode::OK);
    let data = response_json(dashboard).await["data"].clone();
    assert_eq!(data["total_users"], 1);
    assert_eq!(data["new_users_24h"], 1);
    assert_eq!(data["total_products"], 2);
    assert_eq!(data["stockless_products"], 1);
    assert_eq!(data["total_orders"], 2);
    assert_eq!(data["pending_orders"], 1);
    assert_eq!(data["return_orders"], 0);
    assert_eq!(data["revenue"], 400);
}
