//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::{AppState, Config};
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use common::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::{Customer, InMemoryStore, MAX_LINE_QUANTITY, NewProduct, Product};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (Router, InMemoryStore) {
    let store = InMemoryStore::new();
    let config = Config {
        admin_principals: vec!["admin".to_string()],
        ..Config::default()
    };
    let state = Arc::new(AppState::new(store.clone(), &config));
    (api::create_app(state, get_metrics_handle()), store)
}

async fn seed_product(store: &InMemoryStore, name: &str, cents: i64, stock: u32) -> Product {
    let category = store.insert_category("Apparel").await;
    store
        .insert_product(
            NewProduct::new(name, Money::from_cents(cents), stock, category.id)
                .sizes(&["S", "M"]),
        )
        .await
}

async fn seed_customer(store: &InMemoryStore, principal: &str) {
    let customer = Customer::new(principal, format!("{principal}@example.com"), "555-0100");
    store.insert_customer(principal, customer).await;
}

fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, headers, json)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, _, json) = send(&app, request("GET", "/health", &[], None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["catalog"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

mod catalog {
    use super::*;

    #[tokio::test]
    async fn lists_available_products_with_pagination() {
        let (app, store) = setup();
        for (name, cents) in [("Alpha Tee", 3000), ("Beta Tee", 1000), ("Gamma Tee", 2000)] {
            seed_product(&store, name, cents, 5).await;
        }
        let hidden = seed_product(&store, "Hidden Tee", 500, 5).await;
        store.set_product_available(hidden.id, false).await;

        let (status, _, json) = send(
            &app,
            request("GET", "/products?sort=price_asc&page_size=2&search=tee", &[], None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_items"], 3);
        assert_eq!(json["total_pages"], 2);
        assert_eq!(json["has_next"], true);
        assert_eq!(json["items"][0]["name"], "Beta Tee");
        assert_eq!(json["items"][0]["price_cents"], 1000);
        assert_eq!(json["items"][1]["name"], "Gamma Tee");
    }

    #[tokio::test]
    async fn product_lookup_errors() {
        let (app, _) = setup();

        let (status, _, json) = send(&app, request("GET", "/products/not-a-uuid", &[], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("product id"));

        let missing = uuid::Uuid::new_v4();
        let (status, _, _) = send(
            &app,
            request("GET", &format!("/products/{missing}"), &[], None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lists_categories_and_brands() {
        let (app, store) = setup();
        store.insert_category("Shoes").await;
        store.insert_brand("MINIMAL").await;

        let (_, _, categories) = send(&app, request("GET", "/categories", &[], None)).await;
        let (_, _, brands) = send(&app, request("GET", "/brands", &[], None)).await;

        assert_eq!(categories[0]["name"], "Shoes");
        assert_eq!(brands[0]["name"], "MINIMAL");
    }
}

mod cart {
    use super::*;

    #[tokio::test]
    async fn anonymous_cart_gets_a_session_token() {
        let (app, _) = setup();

        let (status, headers, json) = send(&app, request("GET", "/cart", &[], None)).await;

        assert_eq!(status, StatusCode::OK);
        let token = headers.get("x-cart-session").unwrap().to_str().unwrap();
        assert!(!token.is_empty());
        assert_eq!(json["owner"], "session");
        assert_eq!(json["item_count"], 0);
    }

    #[tokio::test]
    async fn adding_twice_merges_lines_and_updates_count() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        let session = [("x-cart-session", "session-1")];
        let body = json!({ "product_id": product.id.to_string(), "quantity": 2, "size": "M" });

        let (status, headers, _) = send(
            &app,
            request("POST", "/cart/items", &session, Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers.get("x-cart-session").unwrap(), "session-1");

        let (_, _, cart) = send(&app, request("POST", "/cart/items", &session, Some(body))).await;
        assert_eq!(cart["lines"].as_array().unwrap().len(), 1);
        assert_eq!(cart["lines"][0]["quantity"], 4);
        assert_eq!(cart["total_cents"], 6000);

        let (_, _, count) = send(&app, request("GET", "/cart/count", &session, None)).await;
        assert_eq!(count["count"], 4);
    }

    #[tokio::test]
    async fn unavailable_product_is_rejected() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        store.set_product_available(product.id, false).await;

        let (status, _, json) = send(
            &app,
            request(
                "POST",
                "/cart/items",
                &[("x-cart-session", "s")],
                Some(json!({ "product_id": product.id.to_string() })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("not available"));
    }

    #[tokio::test]
    async fn quantities_past_the_line_limit_are_bad_requests() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        let session = [("x-cart-session", "s")];
        let add = |quantity: u64| {
            request(
                "POST",
                "/cart/items",
                &session,
                Some(json!({ "product_id": product.id.to_string(), "quantity": quantity })),
            )
        };

        let (status, _, _) = send(&app, add(3_000_000_000)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, cart) = send(&app, add(u64::from(MAX_LINE_QUANTITY))).await;
        assert_eq!(status, StatusCode::CREATED);
        let line_id = cart["lines"][0]["id"].as_str().unwrap().to_string();

        let (status, _, json) = send(&app, add(1)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("per-line limit"));

        let (status, _, _) = send(
            &app,
            request(
                "PATCH",
                &format!("/cart/items/{line_id}"),
                &session,
                Some(json!({ "quantity": 3_000_000_000_i64 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, _, count) = send(&app, request("GET", "/cart/count", &session, None)).await;
        assert_eq!(count["count"], MAX_LINE_QUANTITY);
    }

    #[tokio::test]
    async fn patch_to_zero_removes_line() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        let session = [("x-cart-session", "s")];
        let (_, _, cart) = send(
            &app,
            request(
                "POST",
                "/cart/items",
                &session,
                Some(json!({ "product_id": product.id.to_string() })),
            ),
        )
        .await;
        let line_id = cart["lines"][0]["id"].as_str().unwrap().to_string();

        let (status, _, cart) = send(
            &app,
            request(
                "PATCH",
                &format!("/cart/items/{line_id}"),
                &session,
                Some(json!({ "quantity": 0 })),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cart["item_count"], 0);
    }

    #[tokio::test]
    async fn other_carts_lines_are_forbidden() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        let (_, _, theirs) = send(
            &app,
            request(
                "POST",
                "/cart/items",
                &[("x-cart-session", "theirs")],
                Some(json!({ "product_id": product.id.to_string() })),
            ),
        )
        .await;
        let line_id = theirs["lines"][0]["id"].as_str().unwrap().to_string();

        let (status, _, _) = send(
            &app,
            request(
                "DELETE",
                &format!("/cart/items/{line_id}"),
                &[("x-cart-session", "mine")],
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, _, count) = send(
            &app,
            request("GET", "/cart/count", &[("x-cart-session", "theirs")], None),
        )
        .await;
        assert_eq!(count["count"], 1);
    }

    #[tokio::test]
    async fn sign_in_brings_the_anonymous_cart_along() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        seed_customer(&store, "ada").await;
        send(
            &app,
            request(
                "POST",
                "/cart/items",
                &[("x-cart-session", "s")],
                Some(json!({ "product_id": product.id.to_string(), "quantity": 3 })),
            ),
        )
        .await;

        let (_, _, cart) = send(
            &app,
            request(
                "GET",
                "/cart",
                &[("x-cart-session", "s"), ("x-principal", "ada")],
                None,
            ),
        )
        .await;

        assert_eq!(cart["owner"], "customer");
        assert_eq!(cart["item_count"], 3);

        let (_, _, anon) = send(&app, request("GET", "/cart", &[("x-cart-session", "s")], None)).await;
        assert_eq!(anon["item_count"], 0);
    }

    #[tokio::test]
    async fn clear_empties_cart() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        let session = [("x-cart-session", "s")];
        send(
            &app,
            request(
                "POST",
                "/cart/items",
                &session,
                Some(json!({ "product_id": product.id.to_string() })),
            ),
        )
        .await;

        let (status, _, cart) = send(&app, request("DELETE", "/cart", &session, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cart["item_count"], 0);
    }
}

mod orders {
    use super::*;

    async fn add(app: &Router, headers: &[(&str, &str)], product: &Product, quantity: u32) {
        let (status, _, _) = send(
            app,
            request(
                "POST",
                "/cart/items",
                headers,
                Some(json!({ "product_id": product.id.to_string(), "quantity": quantity })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    fn checkout_body() -> Value {
        json!({ "delivery_address": "42 Harbour Road", "note": "  " })
    }

    #[tokio::test]
    async fn checkout_requires_a_principal() {
        let (app, _) = setup();

        let (status, _, _) = send(
            &app,
            request("POST", "/orders", &[("x-cart-session", "s")], Some(checkout_body())),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(
            &app,
            request("POST", "/orders", &[("x-principal", "ghost")], Some(checkout_body())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_cart_is_a_bad_request() {
        let (app, store) = setup();
        seed_customer(&store, "ada").await;

        let (status, _, json) = send(
            &app,
            request("POST", "/orders", &[("x-principal", "ada")], Some(checkout_body())),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Cart is empty");
    }

    #[tokio::test]
    async fn checkout_creates_order_and_history() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        seed_customer(&store, "ada").await;
        let ada = [("x-principal", "ada")];
        add(&app, &ada, &product, 2).await;

        let (status, _, order) = send(
            &app,
            request("POST", "/orders", &ada, Some(checkout_body())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["status"], "pending");
        assert_eq!(order["total_cents"], 3000);
        assert_eq!(order["note"], Value::Null);
        assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));

        let (_, _, count) = send(&app, request("GET", "/cart/count", &ada, None)).await;
        assert_eq!(count["count"], 0);

        let (_, _, history) = send(&app, request("GET", "/orders", &ada, None)).await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let order_id = order["id"].as_str().unwrap();
        let (status, _, _) = send(
            &app,
            request("GET", &format!("/orders/{order_id}"), &ada, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        seed_customer(&store, "bob").await;
        let (status, _, _) = send(
            &app,
            request(
                "GET",
                &format!("/orders/{order_id}"),
                &[("x-principal", "bob")],
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn insufficient_stock_is_a_conflict() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 2).await;
        seed_customer(&store, "ada").await;
        let ada = [("x-principal", "ada")];
        add(&app, &ada, &product, 10).await;

        let (status, _, json) = send(
            &app,
            request("POST", "/orders", &ada, Some(checkout_body())),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().unwrap().contains("Insufficient stock"));
        let (_, _, count) = send(&app, request("GET", "/cart/count", &ada, None)).await;
        assert_eq!(count["count"], 10);
    }

    #[tokio::test]
    async fn admin_moves_order_forward() {
        let (app, store) = setup();
        let product = seed_product(&store, "Tee", 1500, 5).await;
        seed_customer(&store, "ada").await;
        let ada = [("x-principal", "ada")];
        add(&app, &ada, &product, 1).await;
        let (_, _, order) = send(
            &app,
            request("POST", "/orders", &ada, Some(checkout_body())),
        )
        .await;
        let uri = format!("/admin/orders/{}/status", order["id"].as_str().unwrap());

        let (status, _, _) = send(
            &app,
            request("PUT", &uri, &ada, Some(json!({ "status": "processing" }))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = [("x-principal", "admin")];
        let (status, _, updated) = send(
            &app,
            request("PUT", &uri, &admin, Some(json!({ "status": "processing" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "processing");

        let (status, _, _) = send(
            &app,
            request("PUT", &uri, &admin, Some(json!({ "status": "pending" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, _) = send(
            &app,
            request("PUT", &uri, &admin, Some(json!({ "status": "lost" }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_metrics_endpoint_reports_checkouts() {
    let (app, store) = setup();
    let product = seed_product(&store, "Tee", 1500, 5).await;
    seed_customer(&store, "ada").await;
    let ada = [("x-principal", "ada")];
    send(
        &app,
        request(
            "POST",
            "/cart/items",
            &ada,
            Some(json!({ "product_id": product.id.to_string() })),
        ),
    )
    .await;
    send(
        &app,
        request(
            "POST",
            "/orders",
            &ada,
            Some(json!({ "delivery_address": "1 Main St" })),
        ),
    )
    .await;

    let response = app
        .oneshot(request("GET", "/metrics", &[], None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("checkouts_total"));
    assert!(text.contains("cart_items_added_total"));
}
