//! Ticket store round trips and expiry.

mod common;

use sso_service::services::{MemoryTicketStore, TicketStore, new_ticket_id};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn put_then_get_within_ttl_returns_the_principal() {
    let store = MemoryTicketStore::new(Duration::from_secs(300));
    let ticket = new_ticket_id();

    store.put(&ticket, "alice").await.expect("put must succeed");

    let principal = store.get(&ticket).await.expect("get must succeed");
    assert_eq!(principal.as_deref(), Some("alice"));

    // Lookups do not consume the ticket.
    let again = store.get(&ticket).await.expect("get must succeed");
    assert_eq!(again.as_deref(), Some("alice"));
}

#[tokio::test]
async fn unknown_ticket_is_absent_not_an_error() {
    let store = MemoryTicketStore::new(Duration::from_secs(300));

    let principal = store
        .get("ST-does-not-exist")
        .await
        .expect("unknown ticket must not error");
    assert!(principal.is_none());
}

#[tokio::test]
async fn tickets_expire_with_the_ttl() {
    let store = MemoryTicketStore::new(Duration::from_millis(20));
    let ticket = new_ticket_id();

    store.put(&ticket, "alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let principal = store.get(&ticket).await.unwrap();
    assert!(principal.is_none());
}

#[tokio::test]
async fn a_failing_store_surfaces_errors_from_both_operations() {
    let store = MemoryTicketStore::new(Duration::from_secs(300));
    store.fail_all.store(true, Ordering::SeqCst);

    assert!(store.put("ST-x", "alice").await.is_err());
    assert!(store.get("ST-x").await.is_err());
}
