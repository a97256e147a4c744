use super::{ClientError, ClientKind};
use circuit_gate::{
    CircuitError, CircuitLayer, CircuitPolicy, ClassificationRule, Gateway, Registry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};

#[derive(Debug, thiserror::Error)]
#[error("{0} is unavailable")]
struct Unavailable(String);

fn gateway(threshold: usize) -> Gateway<ClientKind> {
    let registry = Registry::builder()
        .default_policy(CircuitPolicy::windowed(
            threshold,
            Duration::from_secs(10),
            Duration::from_secs(30),
        ))
        .build();
    Gateway::builder()
        .registry(Arc::new(registry))
        .error_mapper(|ctx, _| Box::new(Unavailable(ctx.name().to_string())))
        .build()
}

#[tokio::test]
async fn layer_trips_and_maps_rejections() {
    let gateway = gateway(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let service = ServiceBuilder::new()
        .layer(CircuitLayer::new(gateway.clone(), "inventory"))
        .service(service_fn(move |sku: u32| {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                if sku == 0 {
                    Err(ClientError(ClientKind::BadGateway))
                } else {
                    Ok(sku * 2)
                }
            }
        }));

    assert_eq!(service.clone().oneshot(21).await.unwrap(), 42);

    for _ in 0..2 {
        let err = service.clone().oneshot(0).await.unwrap_err();
        assert!(matches!(err, CircuitError::Inner(ClientError(ClientKind::BadGateway))));
    }

    let err = service.clone().oneshot(21).await.unwrap_err();
    assert!(matches!(err, CircuitError::Mapped(_)));
    assert_eq!(err.to_string(), "inventory is unavailable");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn layer_rule_ignores_client_side_errors() {
    let gateway = gateway(1);
    let rule = ClassificationRule::new()
        .trip([ClientKind::Transport])
        .ignore([ClientKind::NotFound]);

    let service = ServiceBuilder::new()
        .layer(CircuitLayer::new(gateway.clone(), "catalog").with_rule(rule))
        .service(service_fn(|_: ()| async {
            Err::<(), _>(ClientError(ClientKind::NotFound))
        }));

    for _ in 0..5 {
        let err = service.clone().oneshot(()).await.unwrap_err();
        assert!(!err.is_circuit_open());
    }
    assert!(!gateway.registry().get("catalog").unwrap().is_open());
}

#[tokio::test]
async fn layer_and_direct_calls_share_a_circuit() {
    let gateway = gateway(1);
    let service = CircuitLayer::new(gateway.clone(), "search").layer(service_fn(|_: ()| async {
        Ok::<_, ClientError>(())
    }));

    let _ = gateway.call_blocking("search", || Err::<(), _>(ClientError(ClientKind::Timeout)));

    let err = service.oneshot(()).await.unwrap_err();
    assert!(err.is_circuit_open());
}
