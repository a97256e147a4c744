use super::{fail, ok, ClientError, ClientKind};
use circuit_gate::{CircuitError, CircuitState, Gateway, Registry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;

fn gateway_with(
    name: &str,
    frequency: usize,
    period_ms: u64,
    reset_ms: u64,
) -> Gateway<ClientKind> {
    let registry = Registry::new();
    registry.bind_numeric_config(
        name,
        frequency,
        Duration::from_millis(period_ms),
        Duration::from_millis(reset_ms),
    );
    Gateway::new(Arc::new(registry))
}

/// Third failure inside the window opens the circuit; the fourth call never runs.
#[tokio::test(start_paused = true)]
async fn threshold_trip() {
    let gateway = gateway_with("db", 3, 1000, 5000);

    for _ in 0..3 {
        let err = gateway.call_blocking("db", fail(ClientKind::Timeout)).unwrap_err();
        assert!(matches!(err, CircuitError::Inner(ClientError(ClientKind::Timeout))));
        advance(Duration::from_millis(100)).await;
    }

    let ran = AtomicUsize::new(0);
    let err = gateway
        .call_blocking("db", || {
            ran.fetch_add(1, Ordering::SeqCst);
            ok()
        })
        .unwrap_err();

    assert!(err.is_circuit_open());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

/// Failures spaced more than the period apart never accumulate.
#[tokio::test(start_paused = true)]
async fn window_expiry() {
    let gateway = gateway_with("db", 2, 200, 1000);

    for _ in 0..10 {
        let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));
        advance(Duration::from_millis(201)).await;
    }

    let circuit = gateway.registry().get("db").unwrap();
    assert_eq!(circuit.state(), CircuitState::Closed);
}

/// Failures exactly one period apart are still inside the window.
#[tokio::test(start_paused = true)]
async fn window_boundary_is_inclusive() {
    let gateway = gateway_with("db", 2, 200, 1000);

    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));
    advance(Duration::from_millis(200)).await;
    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));

    assert!(gateway.registry().get("db").unwrap().is_open());
}

/// Before the reset timeout calls fail fast; after it exactly one call runs.
#[tokio::test(start_paused = true)]
async fn reset_and_half_open() {
    let gateway = gateway_with("db", 1, 1000, 500);
    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));

    advance(Duration::from_millis(499)).await;
    let err = gateway.call_blocking("db", ok).unwrap_err();
    assert_eq!(err.open_error().unwrap().remaining(), Duration::from_millis(1));

    advance(Duration::from_millis(1)).await;
    let circuit = gateway.registry().get("db").unwrap();
    let (gw, c) = (&gateway, &circuit);

    let trial = gateway
        .call("db", move || async move {
            assert_eq!(c.state(), CircuitState::HalfOpen);

            // A concurrent caller during the trial is rejected
            let rejected = gw.call_blocking("db", ok).unwrap_err();
            assert_eq!(rejected.open_error().unwrap().remaining(), Duration::ZERO);
            Ok::<_, ClientError>("trial")
        })
        .await;

    assert_eq!(trial.unwrap(), "trial");
    assert_eq!(circuit.state(), CircuitState::Closed);
}

/// A successful trial closes the circuit and clears the failure window.
#[tokio::test(start_paused = true)]
async fn half_open_success_closes() {
    let gateway = gateway_with("db", 2, 10_000, 100);
    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));
    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));
    assert!(gateway.registry().get("db").unwrap().is_open());

    advance(Duration::from_millis(100)).await;
    gateway.call_blocking("db", ok).unwrap();

    let snapshot = gateway.registry().get("db").unwrap().snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failures_in_window, 0);

    // One fresh failure is below the threshold again
    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));
    assert_eq!(gateway.registry().get("db").unwrap().state(), CircuitState::Closed);
}

/// A failed trial reopens the circuit and restarts the cooldown.
#[tokio::test(start_paused = true)]
async fn half_open_failure_reopens() {
    let gateway = gateway_with("db", 1, 1000, 300);
    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));

    advance(Duration::from_millis(1000)).await;
    let err = gateway.call_blocking("db", fail(ClientKind::ConnectionReset)).unwrap_err();
    assert!(matches!(err, CircuitError::Inner(_)));

    let circuit = gateway.registry().get("db").unwrap();
    assert_eq!(circuit.state(), CircuitState::Open);
    assert_eq!(circuit.snapshot().trial_in, Some(Duration::from_millis(300)));

    advance(Duration::from_millis(299)).await;
    assert!(gateway.call_blocking("db", ok).unwrap_err().is_circuit_open());
}

/// The `payments` walkthrough: frequency 2, period 500ms, reset 1000ms.
#[tokio::test(start_paused = true)]
async fn payments_scenario() {
    let registry = Registry::<ClientKind>::from_properties([
        ("circuit.payments.frequency", "2"),
        ("circuit.payments.period", "500"),
        ("circuit.payments.reset", "1000"),
    ]);
    let gateway = Gateway::new(Arc::new(registry));

    let _ = gateway.call_blocking("payments", fail(ClientKind::BadGateway));
    advance(Duration::from_millis(100)).await;
    let _ = gateway.call_blocking("payments", fail(ClientKind::BadGateway));
    let circuit = gateway.registry().get("payments").unwrap();
    assert!(circuit.is_open());

    advance(Duration::from_millis(200)).await;
    let err = gateway.call_blocking("payments", ok).unwrap_err();
    assert!(matches!(err, CircuitError::Open(_)));

    advance(Duration::from_millis(900)).await;
    gateway.call_blocking("payments", ok).unwrap();
    assert_eq!(circuit.state(), CircuitState::Closed);

    let fifth = gateway
        .call("payments", || async { Ok::<_, ClientError>(5) })
        .await;
    assert_eq!(fifth.unwrap(), 5);
}

/// A trial whose future is dropped does not wedge the circuit half-open.
#[tokio::test(start_paused = true)]
async fn cancelled_trial_lets_next_caller_retry() {
    let gateway = gateway_with("db", 1, 1000, 100);
    let _ = gateway.call_blocking("db", fail(ClientKind::Timeout));
    advance(Duration::from_millis(100)).await;

    let stuck = gateway.call("db", || async {
        futures::future::pending::<Result<(), ClientError>>().await
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(50), stuck).await;
    assert!(timed_out.is_err());

    let circuit = gateway.registry().get("db").unwrap();
    assert_eq!(circuit.state(), CircuitState::Open);

    gateway.call_blocking("db", ok).unwrap();
    assert_eq!(circuit.state(), CircuitState::Closed);
}
