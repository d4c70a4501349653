use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as Span;
use tokio::sync::Mutex;

use fleet_lease::config::LeasePolicy;
use fleet_lease::model::{Reservation, ReservationStatus, ResourceKind};
use fleet_lease::notify::{
    DeliveryOutcome, Dispatcher, NotifyError, RelayMailer, StaticDirectory, TemplateMailer,
    TemplateMessage, TextMessage,
};
use fleet_lease::store::InMemoryStore;
use fleet_lease::time::{add_hours, now};
use fleet_lease::{AUTO_CANCEL_REASON, LeaseManager};

// ── Test infrastructure ──────────────────────────────────────

const ADMIN: &str = "fleet-admin@example.com";

/// Template API that counts attempts and optionally refuses every send.
#[derive(Default)]
struct Template {
    attempts: AtomicUsize,
    down: bool,
}

#[async_trait]
impl TemplateMailer for Template {
    async fn send_template(&self, _message: &TemplateMessage) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(NotifyError::Delivery {
                channel: "template",
                reason: "503 Service Unavailable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct Relay {
    sent: Mutex<Vec<TextMessage>>,
}

#[async_trait]
impl RelayMailer for Relay {
    async fn send_text(&self, message: &TextMessage) -> Result<(), NotifyError> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    manager: Arc<LeaseManager>,
    template: Arc<Template>,
    relay: Arc<Relay>,
}

fn harness(template_down: bool) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let template = Arc::new(Template {
        attempts: AtomicUsize::new(0),
        down: template_down,
    });
    let relay = Arc::new(Relay::default());
    let dispatcher = Dispatcher::new(store.clone(), Duration::from_secs(2))
        .with_directory(Arc::new(StaticDirectory(Some(ADMIN.to_string()))))
        .with_template(template.clone(), "d-reservation-update")
        .with_relay(relay.clone());
    let manager = Arc::new(LeaseManager::new(
        store.clone(),
        dispatcher,
        LeasePolicy::default(),
    ));
    Harness {
        store,
        manager,
        template,
        relay,
    }
}

fn booking(id: i64, status: ReservationStatus) -> Reservation {
    let mut r = Reservation::new(id, format!("FB-2026-{id:04}"), status);
    r.contact_email = Some(format!("booker{id}@example.com"));
    r.requester_name = Some("R. Santos".to_string());
    r
}

/// Move a lease deadline into the past, as if the hold silently lapsed.
fn lapse(store: &InMemoryStore, id: i64, kind: ResourceKind) {
    let mut r = store.snapshot(id).unwrap();
    let past = Some(now() - Span::minutes(5));
    match kind {
        ResourceKind::Vehicle => r.vehicle_lease_until = past,
        ResourceKind::Driver => r.driver_lease_until = past,
    }
    store.insert(r);
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn lapsed_pending_hold_frees_vehicle_for_next_booker() {
    let h = harness(false);
    h.store.insert(booking(1, ReservationStatus::Pending));
    h.store.insert(booking(2, ReservationStatus::Pending));

    h.manager.claim_vehicle(1, 10).await.unwrap();
    assert!(h.manager.claim_vehicle(2, 10).await.unwrap_err().is_conflict());

    lapse(&h.store, 1, ResourceKind::Vehicle);
    // Expired leases are ignored by the checker even before any sweep.
    h.manager.ensure_vehicle_available(10, Some(2)).await.unwrap();

    let report = h.manager.reconcile_expired_leases().await;
    assert_eq!(report.cancelled, 1);
    let first = h.store.snapshot(1).unwrap();
    assert_eq!(first.status, ReservationStatus::Cancelled);
    assert_eq!(first.reject_reason.as_deref(), Some(AUTO_CANCEL_REASON));

    h.manager.claim_vehicle(2, 10).await.unwrap();
    assert_eq!(h.template.attempts.load(Ordering::SeqCst), 1);
    assert!(h.relay.sent.lock().await.is_empty());
}

#[tokio::test]
async fn approved_trip_returns_driver_after_lease_ends() {
    let h = harness(false);
    h.store.insert(booking(1, ReservationStatus::Approved));
    h.store.insert(booking(2, ReservationStatus::Approved));

    h.manager.claim_vehicle(1, 10).await.unwrap();
    h.manager.claim_driver(1, 5).await.unwrap();
    assert!(h.manager.claim_driver(2, 5).await.unwrap_err().is_conflict());

    lapse(&h.store, 1, ResourceKind::Driver);
    let report = h.manager.reconcile_expired_leases().await;
    assert_eq!(report.released, 1);

    let r = h.store.snapshot(1).unwrap();
    assert_eq!(r.status, ReservationStatus::Approved);
    assert!(!r.has_any_lease());
    assert_eq!(r.driver_id, Some(5));

    h.manager.claim_driver(2, 5).await.unwrap();
    h.manager.claim_vehicle(2, 10).await.unwrap();
    // Released approvals are not notified.
    assert_eq!(h.template.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pending_booking_never_blocks_a_driver() {
    let h = harness(false);
    h.store.insert(booking(1, ReservationStatus::Pending));
    h.store.insert(booking(2, ReservationStatus::Approved));

    h.manager.claim_driver(1, 5).await.unwrap();
    h.manager.claim_driver(2, 5).await.unwrap();
    assert!(h.manager.ensure_driver_available(5, Some(1)).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn template_outage_falls_back_to_relay_with_watchers_copied() {
    let h = harness(true);
    h.store.insert(booking(1, ReservationStatus::Pending));
    h.store.add_watcher(1, "Dispatch@Example.com");
    h.store.add_watcher(1, "dispatch@example.com");
    h.store.add_watcher(1, ADMIN);
    h.manager.claim_vehicle(1, 10).await.unwrap();
    lapse(&h.store, 1, ResourceKind::Vehicle);

    let report = h.manager.reconcile_expired_leases().await;
    assert_eq!(report.cancelled, 1);
    assert_eq!(h.template.attempts.load(Ordering::SeqCst), 1);

    let sent = h.relay.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, ADMIN);
    assert_eq!(
        sent[0].cc,
        vec![
            "booker1@example.com".to_string(),
            "Dispatch@Example.com".to_string()
        ]
    );
    assert_eq!(sent[0].subject, "Reservation FB-2026-0001 cancelled");
    assert!(sent[0].text.contains(AUTO_CANCEL_REASON));
}

#[tokio::test]
async fn racing_sweeps_notify_and_audit_once() {
    let h = harness(false);
    for id in 1..=8 {
        h.store.insert(booking(id, ReservationStatus::Pending));
        h.manager.claim_vehicle(id, 100 + id).await.unwrap();
        lapse(&h.store, id, ResourceKind::Vehicle);
    }

    let (a, b) = tokio::join!(
        h.manager.reconcile_expired_leases(),
        h.manager.reconcile_expired_leases()
    );
    assert_eq!(a.cancelled + b.cancelled, 8);
    assert_eq!(h.template.attempts.load(Ordering::SeqCst), 8);
    for id in 1..=8 {
        assert_eq!(h.store.audit_for(id).await.len(), 1);
    }

    assert!(h.manager.reconcile_expired_leases().await.is_noop());
}

#[tokio::test]
async fn dispatcher_without_admin_skips_delivery() {
    let store = Arc::new(InMemoryStore::new());
    let relay = Arc::new(Relay::default());
    let dispatcher = Dispatcher::new(store.clone(), Duration::from_secs(1))
        .with_directory(Arc::new(StaticDirectory(None)))
        .with_relay(relay.clone());

    let r = booking(1, ReservationStatus::Cancelled);
    let outcome = dispatcher.notify(&r, "subject", "body").await;
    assert!(matches!(outcome, DeliveryOutcome::Skipped(_)));
    assert!(relay.sent.lock().await.is_empty());
}

#[tokio::test]
async fn claim_deadline_follows_policy() {
    let store = Arc::new(InMemoryStore::new());
    store.insert(booking(1, ReservationStatus::Pending));
    let dispatcher = Dispatcher::new(store.clone(), Duration::from_secs(1));
    let policy = LeasePolicy {
        vehicle_hours: 6,
        driver_hours: 1,
    };
    let manager = LeaseManager::new(store.clone(), dispatcher, policy);

    let before = now();
    let vehicle_until = manager.claim_vehicle(1, 10).await.unwrap();
    let driver_until = manager.claim_driver(1, 5).await.unwrap();
    assert!(vehicle_until >= add_hours(before, 6));
    assert!(driver_until >= add_hours(before, 1));
    assert!(driver_until < add_hours(before, 6));
}

#[tokio::test]
async fn booking_handlers_share_the_sweep_audit_trail() {
    let h = harness(false);
    h.store.insert(booking(1, ReservationStatus::Pending));
    h.manager.claim_vehicle(1, 10).await.unwrap();
    h.manager
        .audit_trail()
        .record(1, "dispatcher.ana", "submit", serde_json::json!({ "vehicle_id": 10 }))
        .await
        .unwrap();

    lapse(&h.store, 1, ResourceKind::Vehicle);
    h.manager.reconcile_expired_leases().await;

    let actions: Vec<_> = h.store.audit_for(1).await.into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec!["submit".to_string(), "auto-cancel".to_string()]);
}
