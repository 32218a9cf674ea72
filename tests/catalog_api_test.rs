mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{response_json, TestApp};
use serde_json::{json, Value};

async fn create_category(app: &TestApp, admin: &str, name: &str) -> String {
    let response = app
        .request(
            Method::POST,
            "/admin/category",
            Some(json!({ "name": name, "description": "Seasonal range" })),
            Some(admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["data"]["id"]
        .as_str()
        .expect("category id")
        .to_string()
}

async fn create_product(app: &TestApp, admin: &str, body: Value) -> Value {
    let response = app
        .request(Method::POST, "/admin/product", Some(body), Some(admin))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["data"].clone()
}

#[tokio::test]
async fn admin_builds_catalog_and_shoppers_browse_it() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let category_id = create_category(&app, &admin, "Outerwear").await;

    let parka = create_product(
        &app,
        &admin,
        json!({
            "name": "Arctic Parka",
            "description": "Down filled",
            "price": 5000,
            "size": "L",
            "category_id": category_id,
        }),
    )
    .await;
    create_product(
        &app,
        &admin,
        json!({
            "name": "Light Windbreaker",
            "price": 1500,
            "size": "M",
            "category_id": category_id,
        }),
    )
    .await;
    let parka_id = parka["id"].as_str().expect("product id");

    let stock = app
        .request(
            Method::POST,
            "/admin/inventory",
            Some(json!({ "product_id": parka_id, "quantity": 4 })),
            Some(&admin),
        )
        .await;
    assert_eq!(stock.status(), StatusCode::CREATED);

    let listing = response_json(
        app.request(Method::GET, "/products?search=Parka", None, None)
            .await,
    )
    .await;
    assert_eq!(listing["data"]["pagination"]["total"], 1);
    assert_eq!(listing["data"]["items"][0]["name"], "Arctic Parka");

    let cheap = response_json(
        app.request(Method::GET, "/products?max_price=2000", None, None)
            .await,
    )
    .await;
    assert_eq!(cheap["data"]["pagination"]["total"], 1);
    assert_eq!(cheap["data"]["items"][0]["name"], "Light Windbreaker");

    let details = response_json(
        app.request(Method::GET, &format!("/products/{}", parka_id), None, None)
            .await,
    )
    .await;
    assert_eq!(details["data"]["category_name"], "Outerwear");
    assert_eq!(details["data"]["stock"], 4);
    assert_eq!(details["data"]["in_stock"], true);

    let categories = response_json(app.request(Method::GET, "/categories", None, None).await).await;
    assert_eq!(categories["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn removed_products_disappear_from_the_storefront() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let product = app.seed_product("Vanishing Hat", 300, 2).await;

    let removed = app
        .request(
            Method::PATCH,
            &format!("/admin/product/{}/remove", product.id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(removed.status(), StatusCode::OK);
    assert_eq!(response_json(removed).await["data"]["removed"], true);

    let public = app
        .request(Method::GET, &format!("/products/{}", product.id), None, None)
        .await;
    assert_eq!(public.status(), StatusCode::NOT_FOUND);

    let admin_view = app
        .request(
            Method::GET,
            &format!("/admin/product/{}", product.id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(admin_view.status(), StatusCode::OK);

    let admin_listing = response_json(
        app.request(Method::GET, "/admin/product", None, Some(&admin))
            .await,
    )
    .await;
    assert_eq!(admin_listing["data"]["pagination"]["total"], 1);
    let public_listing = response_json(app.request(Method::GET, "/products", None, None).await).await;
    assert_eq!(public_listing["data"]["pagination"]["total"], 0);
}

#[tokio::test]
async fn stock_can_be_overwritten_and_read_back() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let product = app.seed_product("Stock Mug", 80, 3).await;

    let set = app
        .request(
            Method::PUT,
            &format!("/admin/inventory/{}", product.id),
            Some(json!({ "quantity": 25 })),
            Some(&admin),
        )
        .await;
    assert_eq!(set.status(), StatusCode::OK);

    let read = response_json(
        app.request(
            Method::GET,
            &format!("/admin/inventory/{}", product.id),
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(read["data"]["quantity"], 25);

    let duplicate = app
        .request(
            Method::POST,
            "/admin/inventory",
            Some(json!({ "product_id": product.id, "quantity": 1 })),
            Some(&admin),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let negative = app
        .request(
            Method::PUT,
            &format!("/admin/inventory/{}", product.id),
            Some(json!({ "quantity": -1 })),
            Some(&admin),
        )
        .await;
    assert_eq!(negative.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn product_validation_reports_fields() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let category_id = create_category(&app, &admin, "Validation").await;

    let response = app
        .request(
            Method::POST,
            "/admin/product",
            Some(json!({
                "name": "X",
                "price": 0,
                "size": "S",
                "category_id": category_id,
            })),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert!(body["details"]["name"].is_array());
    assert!(body["details"]["price"].is_array());
}

#[tokio::test]
async fn coupons_are_managed_by_admins_and_listed_for_users() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let (_, token) = app.signup_and_login("coupon-list@example.com").await;

    let created = app
        .request(
            Method::POST,
            "/admin/coupon",
            Some(json!({
                "code": "WELCOME",
                "discount_type": "flat",
                "amount": 100,
                "usage_limit": 10,
                "valid_from": (Utc::now() - Duration::hours(1)).to_rfc3339(),
                "valid_until": (Utc::now() + Duration::days(3)).to_rfc3339(),
            })),
            Some(&admin),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let coupon_id = response_json(created).await["data"]["id"]
        .as_str()
        .expect("coupon id")
        .to_string();

    let visible = response_json(
        app.request(Method::GET, "/user/coupons", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(visible["data"][0]["code"], "WELCOME");

    let deleted = app
        .request(
            Method::DELETE,
            &format!("/admin/coupon/{}", coupon_id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let visible = response_json(
        app.request(Method::GET, "/user/coupons", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(visible["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn moving_a_product_to_another_category_keeps_it_sellable() {
    let app = TestApp::new().await;
    let admin = app.admin_token().await;
    let product = app.seed_product("Moving Lamp", 100, 10).await;

    let (_, early) = app.signup_and_login("early-buyer@example.com").await;
    let early_address = app.add_address(&early).await;
    app.add_to_cart(&early, product.id, 1).await;
    let placed = app.place_order(&early, early_address, "cod").await;
    assert_eq!(placed.status(), StatusCode::CREATED);
    let early_order = response_json(placed).await["data"]["order"]["id"]
        .as_str()
        .expect("order id")
        .to_string();

    let (_, late) = app.signup_and_login("late-buyer@example.com").await;
    let late_address = app.add_address(&late).await;
    app.add_to_cart(&late, product.id, 2).await;

    let lighting = create_category(&app, &admin, "Lighting").await;
    let moved = app
        .request(
            Method::PUT,
            &format!("/admin/product/{}", product.id),
            Some(json!({
                "name": "Moving Lamp",
                "price": 100,
                "size": "M",
                "category_id": lighting,
            })),
            Some(&admin),
        )
        .await;
    assert_eq!(moved.status(), StatusCode::OK);

    // A line added before the move checks out under the new category
    let placed = app.place_order(&late, late_address, "cod").await;
    assert_eq!(placed.status(), StatusCode::CREATED);
    assert_eq!(app.stock_of(product.id).await, 7);

    // An order sold under the old category still restocks
    let cancelled = app
        .request(
            Method::PATCH,
            &format!("/user/order/cancel/{}", early_order),
            None,
            Some(&early),
        )
        .await;
    assert_eq!(cancelled.status(), StatusCode::OK);

    let stock = response_json(
        app.request(
            Method::GET,
            &format!("/admin/inventory/{}", product.id),
            None,
            Some(&admin),
        )
        .await,
    )
    .await;
    assert_eq!(stock["data"]["quantity"], 8);
    assert_eq!(stock["data"]["category_id"], lighting.as_str());

    let duplicate = app
        .request(
            Method::POST,
            "/admin/inventory",
            Some(json!({ "product_id": product.id, "quantity": 5 })),
            Some(&admin),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
}
