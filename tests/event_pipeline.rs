//! Event pipeline integration: catalog events flow through the bus into
//! the registry and become visible to DNS queries.

mod common;

use hickory_proto::rr::RecordType;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use gslb_dns::config::DnsServerConfig;
use gslb_dns::events::{EventBus, EventKind};
use gslb_dns::geoloc::GeoLoc;
use gslb_dns::registry::Registry;
use gslb_dns::resolver::GslbHandler;

use common::{execute_query, extract_ips, EntryBuilder};

const CLIENT: &str = "192.0.2.1:53001";

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_catalog_set_becomes_resolvable_and_delete_removes() {
    let bus = Arc::new(EventBus::new());
    let events = bus
        .catalog_entries
        .subscribe(&[EventKind::Set, EventKind::Delete]);
    let registry = Arc::new(Registry::new(Arc::new(GeoLoc::new(Vec::new(), None))));
    let cancel = CancellationToken::new();
    let registry_task = tokio::spawn(Arc::clone(&registry).run(events, cancel.clone()));

    let handler = GslbHandler::new(Arc::clone(&registry), &DnsServerConfig::default());

    // nothing served yet
    let msg = execute_query(&handler, "svc.test.", RecordType::A, CLIENT).await;
    assert!(msg.answers().is_empty());

    let entry = EntryBuilder::new("svc.test.")
        .member_v4("10.0.0.1", "dc1", 1)
        .ttl(30)
        .build();
    bus.catalog_entries
        .emit(EventKind::Set, Arc::new(entry.clone()))
        .await;
    wait_until(|| registry.get("svc.test.").is_some()).await;

    let msg = execute_query(&handler, "svc.test.", RecordType::A, CLIENT).await;
    assert_eq!(extract_ips(&msg), ["10.0.0.1"]);
    assert_eq!(msg.answers()[0].ttl(), 30);

    bus.catalog_entries
        .emit(EventKind::Delete, Arc::new(entry))
        .await;
    wait_until(|| registry.get("svc.test.").is_none()).await;

    let msg = execute_query(&handler, "svc.test.", RecordType::A, CLIENT).await;
    assert!(msg.answers().is_empty());

    cancel.cancel();
    registry_task.await.unwrap();
}

#[tokio::test]
async fn test_replacing_entry_restarts_rotation() {
    let bus = Arc::new(EventBus::new());
    let events = bus.catalog_entries.subscribe(&[EventKind::Set]);
    let registry = Arc::new(Registry::new(Arc::new(GeoLoc::new(Vec::new(), None))));
    let cancel = CancellationToken::new();
    let registry_task = tokio::spawn(Arc::clone(&registry).run(events, cancel.clone()));

    let handler = GslbHandler::new(Arc::clone(&registry), &DnsServerConfig::default());

    let entry = EntryBuilder::new("svc.test.")
        .member_v4("10.0.0.1", "dc1", 1)
        .member_v4("10.0.0.2", "dc1", 1)
        .build();
    bus.catalog_entries
        .emit(EventKind::Set, Arc::new(entry.clone()))
        .await;
    wait_until(|| registry.get("svc.test.").is_some()).await;

    let first = extract_ips(&execute_query(&handler, "svc.test.", RecordType::A, CLIENT).await);
    assert_eq!(first, ["10.0.0.1"]);

    // a catalog refresh replaces the snapshot, so the rotation starts over
    let before = Arc::as_ptr(&registry.get("svc.test.").unwrap());
    bus.catalog_entries
        .emit(EventKind::Set, Arc::new(entry))
        .await;
    wait_until(|| {
        registry
            .get("svc.test.")
            .map(|snapshot| Arc::as_ptr(&snapshot) != before)
            .unwrap_or(false)
    })
    .await;

    let again = extract_ips(&execute_query(&handler, "svc.test.", RecordType::A, CLIENT).await);
    assert_eq!(again, ["10.0.0.1"]);

    cancel.cancel();
    registry_task.await.unwrap();
}
