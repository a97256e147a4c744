use super::{fail, ClientError, ClientKind};
use circuit_gate::{
    Classification, ClassificationRule, CircuitState, FnClassifier, Gateway, Registry,
};
use std::sync::Arc;
use std::time::Duration;

fn gateway() -> Gateway<ClientKind> {
    let registry = Registry::new();
    registry.bind_numeric_config("api", 2, Duration::from_secs(10), Duration::from_secs(10));
    Gateway::new(Arc::new(registry))
}

/// A kind listed in both sets is ignored.
#[test]
fn ignore_takes_precedence() {
    let gateway = gateway();
    let rule = ClassificationRule::new()
        .trip([ClientKind::Timeout])
        .ignore([ClientKind::Timeout]);

    for _ in 0..10 {
        let _ = gateway.call_blocking_with("api", &rule, fail(ClientKind::Timeout));
    }
    let circuit = gateway.registry().get("api").unwrap();
    assert_eq!(circuit.state(), CircuitState::Closed);
    assert_eq!(circuit.snapshot().failures_in_window, 0);
}

/// The first declaration for a name stays in effect.
#[test]
fn one_shot_binding() {
    let registry: Registry<ClientKind> = Registry::new();
    let rule_a = ClassificationRule::new().ignore([ClientKind::Http]);
    let rule_b = ClassificationRule::new().trip([ClientKind::Http]);

    assert!(registry.bind_classification("x", rule_a));
    assert!(!registry.bind_classification("x", rule_b));

    let circuit = registry.get("x").unwrap();
    assert_eq!(circuit.classify(&ClientKind::NotFound), Classification::Ignore);
}

/// Declaring a parent kind matches its descendants.
#[test]
fn subtype_matching() {
    let gateway = gateway();
    let rule = ClassificationRule::new().trip([ClientKind::Transport]);

    // Http errors are unclassified and never count
    for _ in 0..5 {
        let _ = gateway.call_blocking_with("api", &rule, fail(ClientKind::BadGateway));
    }
    assert!(!gateway.registry().get("api").unwrap().is_open());

    let _ = gateway.call_blocking_with("api", &rule, fail(ClientKind::Timeout));
    let _ = gateway.call_blocking_with("api", &rule, fail(ClientKind::ConnectionReset));
    assert!(gateway.registry().get("api").unwrap().is_open());
}

/// Without any declaration every error trips.
#[test]
fn undeclared_circuits_trip_on_anything() {
    let gateway: Gateway<ClientKind> = Gateway::builder().build();
    let _ = gateway.call_blocking("plain", fail(ClientKind::NotFound));
    assert!(gateway.registry().get("plain").unwrap().is_open());
}

/// The first invocation spends the binding even when it declares nothing.
#[test]
fn declaration_after_first_call_is_ignored() {
    let gateway = gateway();
    let _ = gateway.call_blocking("api", || Ok::<_, ClientError>(()));
    assert!(gateway.registry().is_configured("api").unwrap());

    let rule = ClassificationRule::new().ignore([ClientKind::Http]);
    for _ in 0..2 {
        let _ = gateway.call_blocking_with("api", &rule, fail(ClientKind::NotFound));
    }
    let circuit = gateway.registry().get("api").unwrap();
    assert!(!circuit.is_classified());
    assert!(circuit.is_open());
}

/// Custom classifiers can be bound directly through the registry.
#[test]
fn closure_classifier() {
    let registry: Registry<ClientKind> = Registry::new();
    registry.bind_classification(
        "api",
        FnClassifier::new(|kind: &ClientKind| match kind {
            ClientKind::NotFound => Classification::Ignore,
            _ => Classification::Trip,
        }),
    );
    let gateway = Gateway::new(Arc::new(registry));

    let _ = gateway.call_blocking("api", fail(ClientKind::NotFound));
    assert!(!gateway.registry().get("api").unwrap().is_open());
    let _ = gateway.call_blocking("api", fail(ClientKind::BadGateway));
    assert!(gateway.registry().get("api").unwrap().is_open());
}
