use super::{fail, ok, ClientKind};
use circuit_gate::{
    CircuitPolicy, CircuitState, ConfigError, Gateway, Registry, RegistryError,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::util::SubscriberInitExt;

#[test]
fn list_exists_and_get() {
    let registry: Registry<ClientKind> = Registry::new();
    assert!(registry.is_empty());

    registry.get_or_create("b");
    registry.get_or_create("a");
    registry.get_or_create("b");

    assert_eq!(
        registry.list(),
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
    assert!(registry.exists("a"));
    assert!(!registry.exists("c"));
    assert!(matches!(
        registry.get("c"),
        Err(RegistryError::UnknownCircuit(name)) if name == "c"
    ));
}

#[test]
fn properties_configure_circuits_up_front() {
    // Skipped entries are logged as warnings
    let _guard = tracing_subscriber::fmt().with_test_writer().set_default();

    let registry: Registry<ClientKind> = Registry::new();
    let loaded = registry.load_properties([
        ("circuit.orders.frequency", "4"),
        ("circuit.orders.period", "2000"),
        ("circuit.orders.reset", "3000"),
        ("circuit.users.frequency", "x"),
        ("circuit.users.period", "10"),
        ("circuit.users.reset", "10"),
        ("circuit.users.colour", "blue"),
        ("logging.level", "debug"),
    ]);

    assert_eq!(registry.list(), BTreeSet::from(["orders".to_string()]));
    assert_eq!(
        registry.get("orders").unwrap().policy(),
        &CircuitPolicy::windowed(4, Duration::from_secs(2), Duration::from_secs(3))
    );
    assert_eq!(loaded.errors().len(), 3);
    assert!(loaded
        .errors()
        .iter()
        .any(|e| matches!(e, ConfigError::UnknownProperty { key } if key == "circuit.users.colour")));

    // `users` falls back to the default single-failure policy
    let users = registry.get_or_create("users");
    assert_eq!(users.policy(), &CircuitPolicy::default());
}

#[test]
fn custom_default_policy_applies_to_lazy_circuits() {
    let registry: Registry<ClientKind> = Registry::builder()
        .default_policy(CircuitPolicy::windowed(
            3,
            Duration::from_secs(1),
            Duration::from_secs(5),
        ))
        .build();
    let gateway = Gateway::new(Arc::new(registry));

    let _ = gateway.call_blocking("lazy", fail(ClientKind::Timeout));
    let _ = gateway.call_blocking("lazy", fail(ClientKind::Timeout));
    assert_eq!(
        gateway.registry().get("lazy").unwrap().state(),
        CircuitState::Closed
    );
}

#[test]
fn registry_listeners_observe_every_circuit() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let rejected = Arc::new(AtomicUsize::new(0));
    let permitted = Arc::new(AtomicUsize::new(0));
    let (t, r, p) = (
        Arc::clone(&transitions),
        Arc::clone(&rejected),
        Arc::clone(&permitted),
    );

    let registry: Registry<ClientKind> = Registry::builder()
        .on_state_transition(move |name, from, to| {
            t.lock().unwrap().push((name.to_string(), from, to));
        })
        .on_call_rejected(move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .on_call_permitted(move |_, _| {
            p.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let gateway = Gateway::new(Arc::new(registry));

    let _ = gateway.call_blocking("a", fail(ClientKind::Timeout));
    let _ = gateway.call_blocking("b", ok);
    let _ = gateway.call_blocking("a", ok);

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![("a".to_string(), CircuitState::Closed, CircuitState::Open)]
    );
    assert_eq!(permitted.load(Ordering::SeqCst), 2);
    assert_eq!(rejected.load(Ordering::SeqCst), 1);
}

#[test]
fn snapshots_report_open_circuits() {
    let gateway: Gateway<ClientKind> = Gateway::builder().build();
    let _ = gateway.call_blocking("down", fail(ClientKind::Timeout));
    let _ = gateway.call_blocking("up", ok);

    let snapshots = gateway.registry().snapshots();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].name, "down");
    assert_eq!(snapshots[0].state, CircuitState::Open);
    assert!(snapshots[0].trial_in.is_some());
    assert_eq!(snapshots[1].state, CircuitState::Closed);
    assert_eq!(
        gateway.registry().open_circuits(),
        BTreeSet::from(["down".to_string()])
    );
}
