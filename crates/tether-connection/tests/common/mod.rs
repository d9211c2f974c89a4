//! Common test utilities and mocks

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tether_connection::{
    ConnectionController, ConnectionEvent, ConnectionRecord, ConnectionRegistry, ControllerConfig,
    EventKind, MemoryKeyValueStore, MemorySecretStore, SecretVault,
};
use tether_core::{ConnectionHandle, Connector, Descriptor, Result, StorageScope, TetherError};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Handle returned by [`MockConnector`]
pub struct MockHandle {
    pub uri: String,
    closed: AtomicBool,
}

impl ConnectionHandle for MockHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Lets a test decide when and how a pending connect settles
pub struct Gate {
    tx: oneshot::Sender<std::result::Result<(), String>>,
}

impl Gate {
    pub fn open(self) {
        let _ = self.tx.send(Ok(()));
    }

    pub fn fail(self, message: &str) {
        let _ = self.tx.send(Err(message.to_string()));
    }
}

/// Connector double that settles immediately unless a gate is registered
/// for the descriptor's URI
#[derive(Default)]
pub struct MockConnector {
    gates: Mutex<HashMap<String, VecDeque<oneshot::Receiver<std::result::Result<(), String>>>>>,
    failures: Mutex<HashMap<String, String>>,
    disconnect_delay: Mutex<Option<Duration>>,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub seen: Mutex<Vec<Descriptor>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold the next connect to `uri` until the returned gate is used
    pub fn gate(&self, uri: &str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.gates
            .lock()
            .entry(uri.to_string())
            .or_default()
            .push_back(rx);
        Gate { tx }
    }

    /// Fail every connect to `uri` with `message`
    pub fn fail_with(&self, uri: &str, message: &str) {
        self.failures
            .lock()
            .insert(uri.to_string(), message.to_string());
    }

    pub fn slow_disconnect(&self, delay: Duration) {
        *self.disconnect_delay.lock() = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, descriptor: &Descriptor) -> Result<Arc<dyn ConnectionHandle>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(descriptor.clone());

        if let Some(message) = self.failures.lock().get(&descriptor.uri).cloned() {
            return Err(TetherError::connector(message));
        }

        let gate = self
            .gates
            .lock()
            .get_mut(&descriptor.uri)
            .and_then(|queue| queue.pop_front());
        if let Some(gate) = gate {
            match gate.await {
                Ok(Ok(())) => {}
                Ok(Err(message)) => return Err(TetherError::connector(message)),
                Err(_) => return Err(TetherError::connector("gate dropped")),
            }
        }

        Ok(Arc::new(MockHandle {
            uri: descriptor.uri.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn disconnect(&self, handle: Arc<dyn ConnectionHandle>) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.disconnect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(handle) = handle.as_any().downcast_ref::<MockHandle>() {
            handle.closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Records every event of every kind in delivery order
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl RecordingListener {
    pub fn attach(controller: &ConnectionController) -> Self {
        let recorder = Self::default();
        for kind in [
            EventKind::ConnectionsChanged,
            EventKind::ActiveConnectionChanging,
            EventKind::ActiveConnectionChanged,
        ] {
            let events = recorder.events.clone();
            controller.add_event_listener(kind, move |event| events.lock().push(event.clone()));
        }
        recorder
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Settled `ActiveConnectionChanged` events, as (active, error)
    pub fn settled(&self) -> Vec<(Option<Uuid>, Option<String>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ConnectionEvent::ActiveConnectionChanged { active, error } => {
                    Some((*active, error.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

pub struct Harness {
    pub controller: Arc<ConnectionController>,
    pub connector: Arc<MockConnector>,
    pub store: Arc<MemoryKeyValueStore>,
    pub secrets: Arc<MemorySecretStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let connector = MockConnector::new();
        let store = Arc::new(MemoryKeyValueStore::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let registry = ConnectionRegistry::new(store.clone(), SecretVault::new(secrets.clone()));
        let controller = Arc::new(ConnectionController::new(
            connector.clone(),
            registry,
            config,
        ));
        Self {
            controller,
            connector,
            store,
            secrets,
        }
    }

    /// Save a connection to `mongodb://<host>:27017/` and return its id
    pub fn save(&self, name: &str, host: &str) -> Uuid {
        let descriptor = Descriptor::parse(&uri_for(host)).unwrap();
        let record = ConnectionRecord::new(name, StorageScope::Global, descriptor).unwrap();
        self.controller.add_connection(record).unwrap()
    }
}

pub fn uri_for(host: &str) -> String {
    format!("mongodb://{}:27017/", host)
}
