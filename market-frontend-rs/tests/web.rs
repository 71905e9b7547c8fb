//! Test suite for the Web and headless browsers.

#![cfg(target_arch = "wasm32")]

use market_frontend_rs::{ApiConfig, Wishlist, WishlistItem};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn offline_wishlist() -> Wishlist {
    Wishlist::new(Some(ApiConfig::new("http://127.0.0.1:9")))
}

#[wasm_bindgen_test]
fn logged_out_reads_are_empty() {
    let wishlist = offline_wishlist();
    assert!(!wishlist.is_member("p1"));
    assert_eq!(wishlist.count(), 0);
    assert!(wishlist.items().is_empty());

    let status = wishlist.sync_status();
    assert!(!status.logged_in);
    assert!(!status.loaded);
}

#[wasm_bindgen_test]
fn toggles_are_refused_without_a_session() {
    let wishlist = offline_wishlist();
    assert!(!wishlist.toggle("p1".to_string(), Some(WishlistItem::placeholder("p1"))));
    assert!(!wishlist.remove_item("p1".to_string()));
    assert_eq!(wishlist.count(), 0);
}

#[wasm_bindgen_test]
async fn unreachable_server_is_reported_in_status() {
    let wishlist = offline_wishlist();
    wishlist.login("u1".to_string(), "token".to_string());

    assert!(!wishlist.refetch().await);
    let status = wishlist.sync_status();
    assert!(status.logged_in);
    assert!(status.last_error.is_some());
}
