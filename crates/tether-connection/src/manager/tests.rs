use super::*;
use crate::persistence::MemoryKeyValueStore;
use crate::storage::SecretVault;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use tether_core::StorageScope;

struct Handle;

impl ConnectionHandle for Handle {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct CountingConnector {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, _descriptor: &Descriptor) -> Result<Arc<dyn ConnectionHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Handle))
    }

    async fn disconnect(&self, _handle: Arc<dyn ConnectionHandle>) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn controller() -> (ConnectionController, Arc<CountingConnector>, Uuid) {
    let connector = Arc::new(CountingConnector::default());
    let registry = ConnectionRegistry::new(
        Arc::new(MemoryKeyValueStore::new()),
        SecretVault::unavailable(),
    );
    let controller =
        ConnectionController::new(connector.clone(), registry, ControllerConfig::default());
    let record = ConnectionRecord::new(
        "Local",
        StorageScope::Session,
        Descriptor::parse("mongodb://localhost:27017").unwrap(),
    )
    .unwrap();
    let id = controller.add_connection(record).unwrap();
    (controller, connector, id)
}

#[tokio::test]
async fn test_stale_settlement_releases_handle_and_leaves_state_alone() {
    let (controller, connector, id) = controller();

    let stale = {
        let mut inner = controller.inner.lock();
        let attempt = controller.begin_attempt(&mut inner, id);
        ConnectionController::fence(&mut inner);
        attempt
    };
    assert!(stale.cancel_token().is_cancelled());

    let outcome = controller
        .settle(stale, Ok(Arc::new(Handle) as Arc<dyn ConnectionHandle>))
        .await
        .unwrap();

    assert_eq!(outcome, ConnectOutcome::Cancelled);
    assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(controller.active_connection_id(), None);
    assert!(controller.active_handle().is_none());
}

#[tokio::test]
async fn test_stale_failure_is_swallowed() {
    let (controller, _, id) = controller();

    let stale = {
        let mut inner = controller.inner.lock();
        let attempt = controller.begin_attempt(&mut inner, id);
        ConnectionController::fence(&mut inner);
        attempt
    };

    let outcome = controller
        .settle(stale, Err(TetherError::connector("refused")))
        .await
        .unwrap();
    assert_eq!(outcome, ConnectOutcome::Cancelled);
}

#[tokio::test]
async fn test_tokens_are_strictly_increasing() {
    let (controller, _, id) = controller();

    let tokens: Vec<u64> = (0..3)
        .map(|_| {
            let mut inner = controller.inner.lock();
            controller.begin_attempt(&mut inner, id).token()
        })
        .collect();

    assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(controller.current_attempt().map(|a| a.token()), tokens.last().copied());
}

#[tokio::test]
async fn test_connect_then_disconnect_releases_once() {
    let (controller, connector, id) = controller();

    assert_eq!(controller.connect(id).await.unwrap(), ConnectOutcome::Connected(id));
    assert!(controller.is_connected());
    assert!(controller.connection(id).unwrap().last_used().is_some());

    assert_eq!(
        controller.disconnect().await.unwrap(),
        DisconnectOutcome::Disconnected
    );
    assert_eq!(
        controller.disconnect().await.unwrap(),
        DisconnectOutcome::NothingToDisconnect
    );
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn test_non_connector_errors_are_wrapped() {
    let err = into_connector_error(TetherError::Storage("disk full".into()));
    assert!(matches!(err, TetherError::Connector(ref msg) if msg == "Storage error: disk full"));

    let err = into_connector_error(TetherError::connector("refused"));
    assert_eq!(err.to_string(), "refused");
}
