#![allow(clippy::unwrap_used)]
// Integration tests for `ConnectionSupervisor` on virtual time.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use nodelink_core::{
    ClientError, ConnectionState, ConnectionSupervisor, DiscoverySource, RecordUpdate,
    SessionClient, SessionConfig, SessionHooks,
};

use common::{MockClient, MockDiscovery, TestHooks, refused, settle};

const SERVICE: &str = "_esphomelib._tcp.local.";

// ── Helpers ─────────────────────────────────────────────────────────

fn supervisor(
    client: &Arc<MockClient>,
    hooks: &Arc<TestHooks>,
    discovery: Option<&Arc<MockDiscovery>>,
) -> ConnectionSupervisor {
    let config = SessionConfig::new("porch", "10.0.0.40");
    let client: Arc<dyn SessionClient> = Arc::clone(client) as Arc<dyn SessionClient>;
    let hooks: Arc<dyn SessionHooks> = Arc::clone(hooks) as Arc<dyn SessionHooks>;
    ConnectionSupervisor::new(
        &config,
        client,
        Arc::downgrade(&hooks),
        discovery.map(|d| Arc::clone(d) as Arc<dyn DiscoverySource>),
    )
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::as_conversions
)]
fn expected_wait(n: u32) -> u64 {
    1.8_f64.powi(n.min(10) as i32).min(60.0).round() as u64
}

// ── Backoff and counter ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn five_failures_wait_per_backoff_formula() {
    let client = MockClient::unreachable(refused());
    let hooks = TestHooks::new(Some("porch"));
    let sup = supervisor(&client, &hooks, None);

    sup.start().await;
    tokio::time::sleep(Duration::from_secs(41)).await;

    let times = client.connect_times();
    assert_eq!(times.len(), 6, "attempts at t=0,2,5,11,21,40");
    let waits: Vec<u64> = times
        .windows(2)
        .map(|w| (w[1] - w[0]).as_secs())
        .collect();
    let formula: Vec<u64> = (1..=5).map(expected_wait).collect();
    assert_eq!(waits, formula);
    assert_eq!(waits, vec![2, 3, 6, 10, 19]);

    assert_eq!(sup.tries().await, 6);
    assert!(sup.has_pending_retry().await);
    assert_eq!(
        sup.state(),
        ConnectionState::AwaitingRetry {
            attempt: 6,
            delay: Duration::from_secs(34)
        }
    );
    sup.stop().await;
}

#[test]
fn backoff_saturates_at_one_minute() {
    assert_eq!(expected_wait(10), 60);
    assert_eq!(expected_wait(50), 60);
    let backoff = nodelink_core::Backoff::default();
    assert_eq!(backoff.delay_for(10).as_secs(), expected_wait(10));
    assert_eq!(backoff.delay_for(50).as_secs(), expected_wait(50));
}

#[tokio::test(start_paused = true)]
async fn counter_resets_after_success_and_disconnect() {
    let client = MockClient::new();
    client.push_connect(Err(refused()));
    client.push_connect(Err(refused()));
    let hooks = TestHooks::new(Some("porch"));
    let sup = supervisor(&client, &hooks, None);

    sup.start().await;
    settle().await;
    assert_eq!(sup.tries().await, 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(client.connect_count(), 3);
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(sup.tries().await, 0);
    assert_eq!(hooks.connected.load(Ordering::SeqCst), 1);

    client.drop_connection();
    settle().await;
    assert_eq!(hooks.disconnected.load(Ordering::SeqCst), 1);
    assert_eq!(client.connect_count(), 4, "disconnect retries at once");
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(sup.tries().await, 0);
    sup.stop().await;
}

// ── Timer and discovery ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn discovery_preempts_pending_timer_exactly_once() {
    let client = MockClient::unreachable(refused());
    let hooks = TestHooks::new(Some("porch"));
    let discovery = MockDiscovery::new();
    let sup = supervisor(&client, &hooks, Some(&discovery));

    sup.start().await;
    settle().await;
    assert_eq!(client.connect_count(), 1);
    assert!(sup.is_discovery_listening().await);
    assert_eq!(discovery.listener_count(), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    discovery.announce(&[RecordUpdate::pointer(SERVICE, format!("porch.{SERVICE}"))]);
    settle().await;
    assert_eq!(client.connect_count(), 2, "announcement retries immediately");

    // The first timer (due at ~2s) was cancelled; the replacement waits 3s.
    tokio::time::sleep(Duration::from_millis(2400)).await;
    assert_eq!(client.connect_count(), 2);
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(client.connect_count(), 3);
    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unrelated_alias_never_triggers_attempt() {
    let client = MockClient::unreachable(refused());
    let hooks = TestHooks::new(Some("porch"));
    let discovery = MockDiscovery::new();
    let sup = supervisor(&client, &hooks, Some(&discovery));

    sup.start().await;
    settle().await;
    discovery.announce(&[RecordUpdate::pointer(SERVICE, format!("garage.{SERVICE}"))]);
    settle().await;
    assert_eq!(client.connect_count(), 1);
    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_device_name_ignores_discovery() {
    let client = MockClient::unreachable(refused());
    let hooks = TestHooks::new(None);
    let discovery = MockDiscovery::new();
    let sup = supervisor(&client, &hooks, Some(&discovery));

    sup.start().await;
    settle().await;
    discovery.announce(&[RecordUpdate::pointer(SERVICE, format!("porch.{SERVICE}"))]);
    settle().await;
    assert_eq!(client.connect_count(), 1);
    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn connected_stops_discovery_listening() {
    let client = MockClient::new();
    client.push_connect(Err(refused()));
    let hooks = TestHooks::new(Some("porch"));
    let discovery = MockDiscovery::new();
    let sup = supervisor(&client, &hooks, Some(&discovery));

    sup.start().await;
    settle().await;
    assert_eq!(discovery.listener_count(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(sup.is_connected());
    assert_eq!(discovery.listener_count(), 0);

    client.drop_connection();
    settle().await;
    // Reconnected straight away, listener removed again.
    assert_eq!(discovery.listener_count(), 0);
    sup.stop().await;
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_cancels_timer_and_loop() {
    let client = MockClient::unreachable(refused());
    let hooks = TestHooks::new(Some("porch"));
    let discovery = MockDiscovery::new();
    let sup = supervisor(&client, &hooks, Some(&discovery));

    sup.start().await;
    settle().await;
    assert!(sup.has_pending_retry().await);

    sup.stop().await;
    sup.stop().await;
    assert!(!sup.has_pending_retry().await);
    assert!(!sup.is_discovery_listening().await);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(client.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_during_connect_closes_the_late_link() {
    let client = MockClient::new();
    let gate = client.hold_next_connect();
    let hooks = TestHooks::new(Some("porch"));
    let sup = supervisor(&client, &hooks, None);

    sup.start().await;
    settle().await;
    assert_eq!(client.connect_count(), 1);
    assert_eq!(sup.state(), ConnectionState::Connecting { attempt: 1 });

    sup.stop().await;
    gate.notify_one();
    settle().await;

    assert_eq!(client.disconnect_count(), 1);
    assert_eq!(hooks.connected.load(Ordering::SeqCst), 0);
    assert!(!sup.is_connected());
    assert!(!sup.has_pending_retry().await);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(client.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_while_disconnect_hook_runs_leaves_no_listener() {
    let client = MockClient::new();
    let hooks = TestHooks::new(Some("porch"));
    *hooks.disconnect_delay.lock().unwrap() = Duration::from_secs(1);
    let discovery = MockDiscovery::new();
    let sup = supervisor(&client, &hooks, Some(&discovery));

    sup.start().await;
    settle().await;
    assert!(sup.is_connected());
    assert_eq!(discovery.listener_count(), 0);

    client.drop_connection();
    settle().await;
    assert_eq!(hooks.disconnected.load(Ordering::SeqCst), 1);

    sup.stop().await;
    assert_eq!(discovery.listener_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(discovery.listener_count(), 0);
    assert!(!sup.is_discovery_listening().await);
    assert_eq!(sup.state(), ConnectionState::Connected);
    assert_eq!(client.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let client = MockClient::unreachable(refused());
    let hooks = TestHooks::new(Some("porch"));
    let sup = supervisor(&client, &hooks, None);

    sup.start().await;
    sup.start().await;
    settle().await;
    assert_eq!(client.connect_count(), 1);
    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn inactive_session_is_never_connected() {
    let client = MockClient::new();
    let hooks = TestHooks::new(Some("porch"));
    hooks.active.store(false, Ordering::SeqCst);
    let sup = supervisor(&client, &hooks, None);

    sup.start().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(client.connect_count(), 0);

    hooks.active.store(true, Ordering::SeqCst);
    sup.trigger_reconnect().await;
    settle().await;
    assert!(sup.is_connected());
    sup.stop().await;
}

#[tokio::test(start_paused = true)]
async fn loop_survives_panicking_attempt() {
    let client = MockClient::new();
    client.panic_on_next_connect();
    let hooks = TestHooks::new(Some("porch"));
    let sup = supervisor(&client, &hooks, None);

    sup.start().await;
    settle().await;
    assert!(!sup.is_connected());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(client.connect_count(), 2);
    assert!(sup.is_connected());
    sup.stop().await;
}

// ── Credentials ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rejected_credentials_escalate_without_retry() {
    let client = MockClient::new();
    client.push_connect(Err(ClientError::InvalidEncryptionKey));
    let hooks = TestHooks::new(Some("porch"));
    let discovery = MockDiscovery::new();
    let sup = supervisor(&client, &hooks, Some(&discovery));

    sup.start().await;
    settle().await;
    assert_eq!(sup.state(), ConnectionState::CredentialsRejected);
    assert_eq!(hooks.rejected.load(Ordering::SeqCst), 1);
    assert!(!sup.has_pending_retry().await);

    discovery.announce(&[RecordUpdate::pointer(SERVICE, format!("porch.{SERVICE}"))]);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(client.connect_count(), 1);

    sup.trigger_reconnect().await;
    settle().await;
    assert!(sup.is_connected());
    assert_eq!(sup.tries().await, 0);
    sup.stop().await;
}
