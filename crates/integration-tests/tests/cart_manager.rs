//! Integration tests for the cart state manager.
//!
//! Each test starts its own in-process mock cart server, so they run in
//! parallel without sharing state.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use pestania_core::{ItemId, Money, ProductId, Quantity};
use pestania_integration_tests::{MockCartServer, TEST_TOKEN, eventually, manager_for};
use pestania_storefront::cart::{ADDED_TO_CART, SIGN_IN_TO_ADD, SIGN_IN_TO_MODIFY};
use pestania_storefront::session::{AuthSession, MemorySession, TokenFileSession};
use pestania_storefront::{CartError, CartStatus, ErrorCategory};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::json;

const TTL: Duration = Duration::from_millis(300);
const WAIT: Duration = Duration::from_secs(2);

fn pid(n: i32) -> ProductId {
    ProductId::new(n)
}

fn qty(n: u32) -> Quantity {
    Quantity::new(n).expect("non-zero quantity")
}

fn signed_in() -> Arc<MemorySession> {
    Arc::new(MemorySession::signed_in(SecretString::from(TEST_TOKEN)))
}

// ============================================================================
// Add / remove
// ============================================================================

#[tokio::test]
async fn test_add_then_remove_resolves_item_id() {
    let server = MockCartServer::start().await;
    server.add_product(42, 10);
    server.set_next_item_id(7);
    let cart = server.manager(signed_in(), TTL);

    cart.add_to_cart(pid(42), qty(2))
        .await
        .expect("add should succeed");

    assert_eq!(cart.total(), Money::from(20_i64));
    let items = cart.items();
    let item = items.first().expect("one cart line");
    assert_eq!(item.id, ItemId::new(7));
    assert_eq!(item.product_id, pid(42));

    let requests = server.requests();
    assert_eq!(
        server.request_lines(),
        vec!["POST /api/cart", "GET /api/cart"]
    );
    assert_eq!(
        requests.first().and_then(|r| r.body.clone()),
        Some(json!({ "productId": 42, "quantity": 2 }))
    );

    server.clear_requests();
    cart.remove_from_cart(pid(42))
        .await
        .expect("remove should succeed");

    assert_eq!(
        server.request_lines(),
        vec!["GET /api/cart", "DELETE /api/cart/7", "GET /api/cart"]
    );
    assert!(cart.total().is_zero());
    assert!(cart.items().is_empty());
    assert!(cart.error().is_none());
}

#[tokio::test]
async fn test_add_one_defaults_to_single_unit() {
    let server = MockCartServer::start().await;
    server.add_product(5, 3);
    let cart = server.manager(signed_in(), TTL);

    cart.add_one_to_cart(pid(5)).await.expect("add should succeed");

    assert_eq!(cart.item_count(), 1);
    assert_eq!(
        server.requests().first().and_then(|r| r.body.clone()),
        Some(json!({ "productId": 5, "quantity": 1 }))
    );
}

#[tokio::test]
async fn test_sequential_adds_sum_quantities() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.add_product(2, 5);
    let cart = server.manager(signed_in(), TTL);

    for (product, n) in [(1, 2), (2, 1), (1, 3)] {
        cart.add_to_cart(pid(product), qty(n))
            .await
            .expect("add should succeed");
    }

    assert_eq!(cart.item_count(), 6);
    assert_eq!(cart.item_count(), server.server_item_count());
    assert_eq!(cart.items().len(), 2);
    assert_eq!(cart.total(), Money::from(55_i64));
}

#[tokio::test]
async fn test_concurrent_adds_settle_to_server_state() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.add_product(2, 5);
    server.add_product(3, 1);
    let cart = server.manager(signed_in(), TTL);

    let (a, b, c) = tokio::join!(
        cart.add_to_cart(pid(1), qty(1)),
        cart.add_to_cart(pid(2), qty(2)),
        cart.add_to_cart(pid(3), qty(3)),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    // Racing refreshes may resolve out of order; one more settles the snapshot
    cart.refresh().await.expect("refresh should succeed");
    assert_eq!(cart.item_count(), 6);
    assert_eq!(server.server_item_count(), 6);
    assert!(!cart.is_loading());
}

#[tokio::test]
async fn test_add_failure_sets_product_error_verbatim() {
    let server = MockCartServer::start().await;
    let cart = server.manager(signed_in(), TTL);

    let err = cart
        .add_to_cart(pid(99), qty(1))
        .await
        .expect_err("unknown product should fail");

    assert_eq!(err.category(), ErrorCategory::NetworkOrServerFailure);
    let message = cart.product_message(pid(99));
    assert_eq!(message.error.as_deref(), Some("Producto no encontrado"));
    assert!(message.success.is_none());
    // Add failures are per product, not cart-level
    assert!(cart.error().is_none());
    // No refresh after a failed add
    assert_eq!(server.request_lines(), vec!["POST /api/cart"]);
}

#[tokio::test]
async fn test_add_failure_without_error_body_uses_fallback() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.fail_once_with_text(
        Method::POST,
        "/api/cart",
        StatusCode::INTERNAL_SERVER_ERROR,
        "<html>upstream error</html>",
    );
    let cart = server.manager(signed_in(), TTL);

    assert!(cart.add_to_cart(pid(1), qty(1)).await.is_err());
    assert_eq!(
        cart.product_message(pid(1)).error.as_deref(),
        Some("Could not add the product to the cart")
    );
}

#[tokio::test]
async fn test_new_add_replaces_previous_error() {
    let server = MockCartServer::start().await;
    let cart = server.manager(signed_in(), TTL);

    assert!(cart.add_to_cart(pid(8), qty(1)).await.is_err());
    assert!(cart.product_message(pid(8)).error.is_some());

    server.add_product(8, 2);
    cart.add_to_cart(pid(8), qty(1))
        .await
        .expect("second add should succeed");

    let message = cart.product_message(pid(8));
    assert!(message.error.is_none());
    assert_eq!(message.success.as_deref(), Some(ADDED_TO_CART));
}

#[tokio::test]
async fn test_remove_missing_product_is_item_not_found() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.seed_item(1, 2);
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");
    let before = cart.items();
    server.clear_requests();

    let err = cart
        .remove_from_cart(pid(5))
        .await
        .expect_err("absent product cannot be removed");

    assert!(matches!(err, CartError::ItemNotFound { product_id } if product_id == pid(5)));
    assert_eq!(err.category(), ErrorCategory::ItemNotFound);
    assert_eq!(cart.items(), before);
    assert_eq!(cart.error().as_deref(), Some("Product 5 is not in the cart"));
    assert_eq!(server.request_lines(), vec!["GET /api/cart"]);
}

#[tokio::test]
async fn test_remove_with_stale_item_id_surfaces_server_error() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let item_id = server.seed_item(1, 1);
    server.fail_once(
        Method::DELETE,
        &format!("/api/cart/{item_id}"),
        StatusCode::NOT_FOUND,
        Some("Item no encontrado"),
    );
    let cart = server.manager(signed_in(), TTL);

    let err = cart
        .remove_from_cart(pid(1))
        .await
        .expect_err("server rejected the delete");

    assert!(matches!(err, CartError::Api { status, .. } if status.as_u16() == 404));
    assert_eq!(cart.error().as_deref(), Some("Item no encontrado"));
}

#[tokio::test]
async fn test_remove_resolves_against_fresh_server_state() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");
    assert!(cart.items().is_empty());

    // Added from another device; the local snapshot does not know about it
    let item_id = server.seed_item(1, 1);
    cart.remove_from_cart(pid(1))
        .await
        .expect("remove should find the item on the server");

    assert!(
        server
            .request_lines()
            .contains(&format!("DELETE /api/cart/{item_id}"))
    );
    assert_eq!(server.server_item_count(), 0);
}

// ============================================================================
// Update / clear
// ============================================================================

#[tokio::test]
async fn test_update_quantity() {
    let server = MockCartServer::start().await;
    server.add_product(3, 19.99);
    let item_id = server.seed_item(3, 1);
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");
    server.clear_requests();

    cart.update_quantity(pid(3), qty(4))
        .await
        .expect("update should succeed");

    let put = format!("PUT /api/cart/{item_id}");
    assert_eq!(
        server.request_lines(),
        vec!["GET /api/cart", put.as_str(), "GET /api/cart"]
    );
    assert_eq!(
        server.requests().get(1).and_then(|r| r.body.clone()),
        Some(json!({ "quantity": 4 }))
    );
    assert_eq!(cart.item_count(), 4);
    assert_eq!(cart.total(), Money::from_minor(7996));
}

#[tokio::test]
async fn test_update_to_zero_is_rejected_locally() {
    let server = MockCartServer::start().await;
    server.add_product(3, 1);
    server.seed_item(3, 2);
    let cart = server.manager(signed_in(), TTL);

    let err = cart
        .update_quantity_raw(pid(3), 0)
        .await
        .expect_err("zero quantity is invalid");

    assert!(matches!(err, CartError::InvalidQuantity(0)));
    assert!(server.requests().is_empty());
    assert!(cart.error().is_some());
}

#[tokio::test]
async fn test_update_missing_product_is_item_not_found() {
    let server = MockCartServer::start().await;
    let cart = server.manager(signed_in(), TTL);

    let err = cart
        .update_quantity(pid(12), qty(2))
        .await
        .expect_err("absent product cannot be updated");

    assert_eq!(err.category(), ErrorCategory::ItemNotFound);
    assert_eq!(server.request_lines(), vec!["GET /api/cart"]);
}

#[tokio::test]
async fn test_clear_cart_empties_without_refresh() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.add_product(2, 20);
    server.seed_item(1, 1);
    server.seed_item(2, 1);
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");
    assert_eq!(cart.items().len(), 2);
    server.clear_requests();

    cart.clear_cart().await.expect("clear should succeed");

    assert!(cart.items().is_empty());
    assert!(cart.total().is_zero());
    assert_eq!(server.request_lines(), vec!["DELETE /api/cart"]);
}

#[tokio::test]
async fn test_clear_cart_failure_keeps_snapshot() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.seed_item(1, 1);
    server.fail_once(
        Method::DELETE,
        "/api/cart",
        StatusCode::INTERNAL_SERVER_ERROR,
        Some("Error al limpiar el carrito"),
    );
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");

    assert!(cart.clear_cart().await.is_err());
    assert_eq!(cart.items().len(), 1);
    assert_eq!(cart.error().as_deref(), Some("Error al limpiar el carrito"));
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_failure_keeps_previous_snapshot() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.seed_item(1, 2);
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");

    server.wipe_cart();
    server.fail_once(Method::GET, "/api/cart", StatusCode::SERVICE_UNAVAILABLE, None);

    assert!(cart.refresh().await.is_err());
    assert_eq!(cart.item_count(), 2);
    assert_eq!(cart.error().as_deref(), Some("Could not load the cart"));
    assert!(!cart.is_loading());
    assert_eq!(cart.status(), CartStatus::Ready);
}

#[tokio::test]
async fn test_refresh_transport_failure() {
    // Nothing listens on port 1
    let cart = manager_for("http://127.0.0.1:1/", signed_in(), TTL);

    let err = cart.refresh().await.expect_err("connection should fail");

    assert!(matches!(err, CartError::Request(_)));
    assert_eq!(err.category(), ErrorCategory::NetworkOrServerFailure);
    assert_eq!(cart.error().as_deref(), Some("Could not load the cart"));
    assert!(!cart.is_loading());
}

#[tokio::test]
async fn test_empty_cart_total_is_zero() {
    let server = MockCartServer::start().await;
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");

    assert!(cart.total().is_zero());
    assert_eq!(cart.item_count(), 0);
}

#[tokio::test]
async fn test_every_request_carries_bearer_token() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let cart = server.manager(signed_in(), TTL);

    cart.add_to_cart(pid(1), qty(1)).await.expect("add");
    cart.update_quantity(pid(1), qty(2)).await.expect("update");
    cart.remove_from_cart(pid(1)).await.expect("remove");
    cart.clear_cart().await.expect("clear");

    let expected = format!("Bearer {TEST_TOKEN}");
    let requests = server.requests();
    assert!(!requests.is_empty());
    assert!(
        requests
            .iter()
            .all(|r| r.authorization.as_deref() == Some(expected.as_str()))
    );
}

#[tokio::test]
async fn test_rejected_token_is_reported_as_server_error() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let session = Arc::new(MemorySession::signed_in(SecretString::from("expired")));
    let cart = server.manager(session, TTL);

    let err = cart
        .add_to_cart(pid(1), qty(1))
        .await
        .expect_err("token is not accepted");

    assert!(err.is_unauthorized());
    assert_eq!(err.category(), ErrorCategory::NetworkOrServerFailure);
    assert_eq!(
        cart.product_message(pid(1)).error.as_deref(),
        Some("Token inválido")
    );
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_mutations_make_no_requests() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let cart = server.manager(Arc::new(MemorySession::new()), TTL);

    let err = cart
        .add_to_cart(pid(1), qty(1))
        .await
        .expect_err("add requires a session");
    assert_eq!(err.category(), ErrorCategory::AuthRequired);
    assert_eq!(cart.error().as_deref(), Some(SIGN_IN_TO_ADD));
    assert!(cart.product_message(pid(1)).is_empty());

    assert!(cart.remove_from_cart(pid(1)).await.is_err());
    assert!(cart.update_quantity(pid(1), qty(2)).await.is_err());
    assert!(cart.update_quantity_raw(pid(1), 0).await.is_err());
    assert!(matches!(
        cart.clear_cart().await,
        Err(CartError::AuthRequired(_))
    ));

    assert_eq!(cart.error().as_deref(), Some(SIGN_IN_TO_MODIFY));
    assert!(server.requests().is_empty());
    assert_eq!(cart.status(), CartStatus::Unauthenticated);
}

#[tokio::test]
async fn test_watch_auth_loads_and_discards_cart() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.seed_item(1, 3);
    let session = Arc::new(MemorySession::new());
    let cart = server.manager(session.clone(), TTL);
    let watcher = cart.watch_auth(session.subscribe());

    assert!(eventually(WAIT, || cart.status() == CartStatus::Unauthenticated).await);
    assert!(cart.items().is_empty());

    session.sign_in(SecretString::from(TEST_TOKEN));
    assert!(eventually(WAIT, || cart.item_count() == 3).await);
    assert!(eventually(WAIT, || cart.status() == CartStatus::Ready).await);

    // Leave some per-product state behind
    assert!(cart.add_to_cart(pid(77), qty(1)).await.is_err());
    assert!(cart.product_message(pid(77)).error.is_some());

    session.sign_out();
    assert!(
        eventually(WAIT, || {
            cart.items().is_empty() && cart.product_message(pid(77)).is_empty()
        })
        .await
    );
    assert!(cart.error().is_none());
    assert!(cart.total().is_zero());
    assert_eq!(cart.status(), CartStatus::Unauthenticated);

    watcher.abort();
}

#[tokio::test]
async fn test_sign_in_clears_auth_error() {
    let server = MockCartServer::start().await;
    let session = Arc::new(MemorySession::new());
    let cart = server.manager(session.clone(), TTL);

    assert!(cart.clear_cart().await.is_err());
    assert!(cart.error().is_some());

    session.sign_in(SecretString::from(TEST_TOKEN));
    cart.sync_auth().await;
    assert!(cart.error().is_none());
    assert_eq!(server.request_lines(), vec!["GET /api/cart"]);
}

#[tokio::test]
async fn test_token_file_session_is_read_per_request() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let path = std::env::temp_dir()
        .join(format!("pestania-it-{}", std::process::id()))
        .join("token");
    let session = Arc::new(TokenFileSession::new(path.clone()));
    session
        .store(&SecretString::from(TEST_TOKEN))
        .expect("write token");
    let cart = server.manager(session.clone(), TTL);

    cart.add_to_cart(pid(1), qty(1)).await.expect("add");
    assert_eq!(cart.item_count(), 1);

    session.clear().expect("remove token");
    assert!(!session.is_authenticated());
    server.clear_requests();

    assert!(cart.add_to_cart(pid(1), qty(1)).await.is_err());
    assert!(server.requests().is_empty());
}

// ============================================================================
// Product messages
// ============================================================================

#[tokio::test]
async fn test_success_message_expires_independently() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let cart = server.manager(signed_in(), TTL);

    cart.add_to_cart(pid(1), qty(1)).await.expect("add");
    assert!(cart.add_to_cart(pid(2), qty(1)).await.is_err());

    assert_eq!(
        cart.product_message(pid(1)).success.as_deref(),
        Some(ADDED_TO_CART)
    );
    assert!(cart.product_message(pid(2)).error.is_some());

    assert!(eventually(WAIT, || cart.product_message(pid(1)).is_empty()).await);
    // Errors stay until acknowledged
    assert!(cart.product_message(pid(2)).error.is_some());

    cart.clear_product_message(pid(2));
    assert!(cart.product_message(pid(2)).is_empty());
}

#[tokio::test]
async fn test_clear_messages_resets_cart_error_only() {
    let server = MockCartServer::start().await;
    let cart = server.manager(Arc::new(MemorySession::new()), TTL);

    assert!(cart.add_to_cart(pid(1), qty(1)).await.is_err());
    assert!(cart.error().is_some());

    cart.clear_messages();
    assert!(cart.error().is_none());
}

#[tokio::test]
async fn test_total_saturates_on_huge_prices() {
    let server = MockCartServer::start().await;
    server.add_product(1, "79228162514264337593543950335");
    server.add_product(2, 1);
    server.seed_item(1, 2);
    server.seed_item(2, 1);
    let cart = server.manager(signed_in(), TTL);
    cart.refresh().await.expect("refresh should succeed");

    assert_eq!(cart.total(), Money::new(Decimal::MAX));
    assert_eq!(cart.item_count(), 3);
}

// ============================================================================
// Sign-out while requests are in flight
// ============================================================================

#[tokio::test]
async fn test_refresh_is_loading_until_response() {
    let server = MockCartServer::start().await;
    let release = server.hold_once(Method::GET, "/api/cart");
    let cart = server.manager(signed_in(), TTL);

    let task = tokio::spawn({
        let cart = cart.clone();
        async move { cart.refresh().await }
    });

    assert!(eventually(WAIT, || cart.status() == CartStatus::Loading).await);
    assert!(cart.is_loading());

    let _ = release.send(());
    assert!(task.await.expect("refresh task").is_ok());
    assert!(!cart.is_loading());
    assert_eq!(cart.status(), CartStatus::Ready);
}

#[tokio::test]
async fn test_refresh_answered_after_sign_out_is_discarded() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    server.seed_item(1, 2);
    let release = server.hold_once(Method::GET, "/api/cart");
    let session = signed_in();
    let cart = server.manager(session.clone(), TTL);

    let task = tokio::spawn({
        let cart = cart.clone();
        async move { cart.refresh().await }
    });
    assert!(eventually(WAIT, || cart.status() == CartStatus::Loading).await);
    assert!(eventually(WAIT, || !server.requests().is_empty()).await);

    session.sign_out();
    cart.sync_auth().await;
    assert!(!cart.is_loading());

    let _ = release.send(());
    assert!(task.await.expect("refresh task").is_ok());

    assert!(cart.items().is_empty());
    assert!(cart.error().is_none());
    assert!(!cart.is_loading());
    assert_eq!(cart.status(), CartStatus::Unauthenticated);
}

#[tokio::test]
async fn test_refresh_failing_after_sign_out_leaves_no_error() {
    let server = MockCartServer::start().await;
    let release = server.hold_once(Method::GET, "/api/cart");
    server.fail_once(Method::GET, "/api/cart", StatusCode::SERVICE_UNAVAILABLE, None);
    let session = signed_in();
    let cart = server.manager(session.clone(), TTL);

    let task = tokio::spawn({
        let cart = cart.clone();
        async move { cart.refresh().await }
    });
    assert!(eventually(WAIT, || !server.requests().is_empty()).await);

    session.sign_out();
    cart.sync_auth().await;
    let _ = release.send(());

    assert!(task.await.expect("refresh task").is_err());
    assert!(cart.error().is_none());
    assert!(!cart.is_loading());
}

#[tokio::test]
async fn test_add_completed_after_sign_out_leaves_no_message() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let release = server.hold_once(Method::POST, "/api/cart");
    let session = signed_in();
    let cart = server.manager(session.clone(), TTL);

    let task = tokio::spawn({
        let cart = cart.clone();
        async move { cart.add_to_cart(pid(1), qty(1)).await }
    });
    assert!(eventually(WAIT, || !server.requests().is_empty()).await);

    session.sign_out();
    cart.sync_auth().await;
    let _ = release.send(());

    // The server applied the add, but nothing of it reaches the signed-out state
    assert!(task.await.expect("add task").is_ok());
    assert!(cart.product_message(pid(1)).is_empty());
    assert!(cart.items().is_empty());
    assert!(cart.error().is_none());
    assert_eq!(server.request_lines(), vec!["POST /api/cart"]);
}

#[tokio::test]
async fn test_add_failing_after_sign_out_leaves_no_message() {
    let server = MockCartServer::start().await;
    let release = server.hold_once(Method::POST, "/api/cart");
    let session = signed_in();
    let cart = server.manager(session.clone(), TTL);

    let task = tokio::spawn({
        let cart = cart.clone();
        async move { cart.add_to_cart(pid(9), qty(1)).await }
    });
    assert!(eventually(WAIT, || !server.requests().is_empty()).await);

    session.sign_out();
    cart.sync_auth().await;
    let _ = release.send(());

    assert!(task.await.expect("add task").is_err());
    assert!(cart.product_message(pid(9)).is_empty());
}

#[tokio::test]
async fn test_remove_failing_after_sign_out_leaves_no_error() {
    let server = MockCartServer::start().await;
    server.add_product(1, 10);
    let item_id = server.seed_item(1, 1);
    let path = format!("/api/cart/{item_id}");
    let release = server.hold_once(Method::DELETE, &path);
    server.fail_once(Method::DELETE, &path, StatusCode::NOT_FOUND, Some("Item no encontrado"));
    let session = signed_in();
    let cart = server.manager(session.clone(), TTL);

    let task = tokio::spawn({
        let cart = cart.clone();
        async move { cart.remove_from_cart(pid(1)).await }
    });
    assert!(eventually(WAIT, || server.request_lines().contains(&format!("DELETE {path}"))).await);

    session.sign_out();
    cart.sync_auth().await;
    let _ = release.send(());

    assert!(task.await.expect("remove task").is_err());
    assert!(cart.error().is_none());
    assert!(cart.items().is_empty());
}
