use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use as400_bridge::config::{RetryPolicy, SessionConfig};
use as400_bridge::transport::{ConnectOutcome, FakeSessionTransport};
use as400_bridge::{
    AuditOutcome, BridgeError, ConnectionManager, ErrorKind, MemoryAuditSink, SessionTransport,
};

fn manager_for(fake: &FakeSessionTransport) -> ConnectionManager<FakeSessionTransport> {
    let handle = fake.clone();
    ConnectionManager::new(move |_| handle.clone())
}

fn config() -> SessionConfig {
    SessionConfig::new("as400.example.com", 23).with_timeout(Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_attempts_exactly_n_times() {
    for n in 1..=5u32 {
        let fake = FakeSessionTransport::new();
        for _ in 0..n {
            fake.push_connect(ConnectOutcome::Refuse("connection refused".into()));
        }
        let mut manager = manager_for(&fake);

        let policy = RetryPolicy::new(n).with_initial_delay(Duration::from_millis(10));
        let err = manager.connect_with_retry(config(), policy).await.unwrap_err();

        match err {
            BridgeError::ConnectionTimeout { host, attempts, .. } => {
                assert_eq!(host, "as400.example.com:23");
                assert_eq!(attempts, n);
            }
            other => panic!("expected ConnectionTimeout, got {other:?}"),
        }
        assert_eq!(fake.connect_attempts(), n);
        assert_eq!(manager.last_attempts().len(), n as usize);
        assert!(!manager.is_connected());
    }
}

#[tokio::test(start_paused = true)]
async fn test_third_attempt_succeeds_after_100_and_200ms() {
    let fake = FakeSessionTransport::new();
    fake.push_connect(ConnectOutcome::Refuse("refused".into()))
        .push_connect(ConnectOutcome::Refuse("refused".into()))
        .push_connect(ConnectOutcome::Succeed);
    let mut manager = manager_for(&fake);

    let policy = RetryPolicy::new(3)
        .with_initial_delay(Duration::from_millis(100))
        .with_multiplier(2.0);
    let started = Instant::now();
    let session = manager.connect_with_retry(config(), policy).await.unwrap();

    assert!(session.is_connected());
    assert_eq!(started.elapsed(), Duration::from_millis(300));
    assert_eq!(fake.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_counts_as_failed_attempt() {
    let fake = FakeSessionTransport::new();
    fake.push_connect(ConnectOutcome::Hang)
        .push_connect(ConnectOutcome::Succeed);
    let mut manager = manager_for(&fake);

    let policy = RetryPolicy::new(2).with_initial_delay(Duration::from_millis(100));
    let started = Instant::now();
    manager.connect_with_retry(config(), policy).await.unwrap();

    // one per-attempt timeout plus one back-off sleep
    assert_eq!(started.elapsed(), Duration::from_millis(1_100));
    let attempts = manager.last_attempts();
    assert_eq!(attempts[0].failure, Some(ErrorKind::ConnectionFailed));
    assert_eq!(attempts[0].duration, Duration::from_secs(1));
    assert!(attempts[1].succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_not_retried() {
    let fake = FakeSessionTransport::new();
    fake.push_connect(ConnectOutcome::RejectAuth("CPF1120 user does not exist".into()));
    let sink = Arc::new(MemoryAuditSink::new());
    let mut manager = manager_for(&fake).with_audit(sink.clone());

    let started = Instant::now();
    let err = manager
        .connect_with_retry(config(), RetryPolicy::new(5))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!err.is_recoverable());
    assert_eq!(fake.connect_attempts(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(
        sink.events().last().map(|e| e.outcome),
        Some(AuditOutcome::Failure(ErrorKind::Authentication))
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_delay_retries_immediately() {
    let fake = FakeSessionTransport::new();
    fake.push_connect(ConnectOutcome::Refuse("refused".into()))
        .push_connect(ConnectOutcome::Refuse("refused".into()));
    let mut manager = manager_for(&fake);

    let policy = RetryPolicy::new(3).with_initial_delay(Duration::ZERO);
    let started = Instant::now();
    manager.connect_with_retry(config(), policy).await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(fake.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_overall_budget_stops_before_sleeping_past_it() {
    let fake = FakeSessionTransport::new();
    for _ in 0..10 {
        fake.push_connect(ConnectOutcome::Refuse("refused".into()));
    }
    let mut manager = manager_for(&fake);

    // sleeps would be 100, 200, 400, 800...; 100 + 200 fits in 500, 400 more does not
    let policy = RetryPolicy::new(10)
        .with_initial_delay(Duration::from_millis(100))
        .with_timeout(Duration::from_millis(500));
    let started = Instant::now();
    let err = manager.connect_with_retry(config(), policy).await.unwrap_err();

    assert!(matches!(err, BridgeError::ConnectionTimeout { attempts: 3, .. }));
    assert_eq!(fake.connect_attempts(), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replaces_previous_session() {
    let fake = FakeSessionTransport::new();
    let mut manager = manager_for(&fake);

    manager.connect_with_retry(config(), RetryPolicy::new(1)).await.unwrap();
    let first_id = manager.session_id();
    manager.connect_with_retry(config(), RetryPolicy::new(1)).await.unwrap();

    assert_ne!(manager.session_id(), first_id);
    assert_eq!(manager.last_attempts().len(), 1);
    assert!(manager.is_connected());

    manager.disconnect().await;
    manager.disconnect().await;
    assert!(!manager.is_connected());
    assert!(manager.session_mut().is_none());
}

#[test]
fn test_backoff_schedule_caps() {
    let policy = RetryPolicy::new(6)
        .with_initial_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(3))
        .with_multiplier(2.0);
    let delays: Vec<u64> = policy.backoff().map(|d| d.as_millis() as u64).collect();
    assert_eq!(delays, vec![500, 1_000, 2_000, 3_000, 3_000]);
}
