//! Connection controller owning the single active connection slot
//!
//! At most one connection is active at a time. Every connect attempt gets a
//! monotonic fencing token; starting a newer attempt or disconnecting bumps
//! the latest token and cancels the older attempt, which then settles as
//! [`ConnectOutcome::Cancelled`] without touching state. A handle that arrives
//! for a superseded attempt is released through the connector.
//!
//! Lock order is controller state, then registry. Events are queued while the
//! state lock is held and flushed after it is released, and no lock is held
//! across an await.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tether_core::{ConnectionHandle, Connector, Descriptor, Result, TetherError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{ConnectionRecord, ControllerConfig};
use crate::events::{ChangeNotifier, ConnectionEvent, EventKind, ListenerId};
use crate::lifecycle::{ActiveAttempt, ConnectOutcome, ConnectionState, DisconnectOutcome};
use crate::registry::ConnectionRegistry;

struct ActiveConnection {
    id: Uuid,
    handle: Arc<dyn ConnectionHandle>,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct LifecycleInner {
    state: ConnectionState,
    latest_token: u64,
    attempt: Option<ActiveAttempt>,
    active: Option<ActiveConnection>,
}

enum Settlement {
    Stale(Option<Arc<dyn ConnectionHandle>>),
    Connected,
    Failed(TetherError),
}

/// Manages the lifecycle of the active connection
pub struct ConnectionController {
    connector: Arc<dyn Connector>,
    registry: ConnectionRegistry,
    notifier: ChangeNotifier,
    config: ControllerConfig,
    inner: Mutex<LifecycleInner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionController {
    pub fn new(
        connector: Arc<dyn Connector>,
        registry: ConnectionRegistry,
        config: ControllerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            registry,
            notifier: ChangeNotifier::new(),
            config,
            inner: Mutex::new(LifecycleInner::default()),
            state_tx,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Connect to a saved connection, replacing the active one.
    ///
    /// A newer `connect` or a `disconnect` issued while this call is pending
    /// makes it return `Ok(ConnectOutcome::Cancelled)`. Connector failures are
    /// returned with the connector's message unmodified.
    #[tracing::instrument(skip(self), fields(connection_id = %id))]
    pub async fn connect(&self, id: Uuid) -> Result<ConnectOutcome> {
        tracing::info!("connect requested");
        let descriptor = self.registry.resolve_descriptor(id)?;

        let attempt = loop {
            let step = {
                let mut inner = self.inner.lock();
                match inner.state {
                    // Removed while the implicit disconnect was running
                    _ if !self.registry.contains(id) => Err(TetherError::NotFound(id)),
                    ConnectionState::Disconnecting => Err(TetherError::Busy(
                        "Unable to connect: currently disconnecting".into(),
                    )),
                    ConnectionState::Connected => Ok(None),
                    ConnectionState::Disconnected | ConnectionState::Connecting => {
                        Ok(Some(self.begin_attempt(&mut inner, id)))
                    }
                }
            };

            match step? {
                Some(attempt) => break attempt,
                None => {
                    tracing::debug!("disconnecting current connection before connecting");
                    self.disconnect().await?;
                }
            }
        };
        self.notifier.flush();

        self.run_attempt(attempt, &descriptor).await
    }

    /// Save a connection and connect to it
    pub async fn add_and_connect(&self, record: ConnectionRecord) -> Result<ConnectOutcome> {
        let id = self.add_connection(record)?;
        self.connect(id).await
    }

    /// Tear down the active connection or the pending attempt.
    ///
    /// A call made while another disconnect is running waits for it to finish
    /// and returns [`DisconnectOutcome::AlreadyDisconnecting`].
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<DisconnectOutcome> {
        enum Step {
            Nothing,
            Join,
            Release(Option<ActiveConnection>),
        }

        let step = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Disconnected => Step::Nothing,
                ConnectionState::Disconnecting => Step::Join,
                ConnectionState::Connecting => {
                    Self::fence(&mut inner);
                    self.transition(&mut inner, ConnectionState::Disconnecting);
                    Step::Release(None)
                }
                ConnectionState::Connected => {
                    let active = inner.active.take();
                    self.transition(&mut inner, ConnectionState::Disconnecting);
                    Step::Release(active)
                }
            }
        };

        match step {
            Step::Nothing => {
                tracing::debug!("nothing to disconnect");
                Ok(DisconnectOutcome::NothingToDisconnect)
            }
            Step::Join => {
                tracing::debug!("disconnect already in progress, waiting for it");
                let mut state_rx = self.state_tx.subscribe();
                // The sender lives as long as self, so this only ends on a state change
                let _ = state_rx
                    .wait_for(|state| *state != ConnectionState::Disconnecting)
                    .await;
                Ok(DisconnectOutcome::AlreadyDisconnecting)
            }
            Step::Release(active) => {
                if let Some(active) = active {
                    tracing::info!(
                        connection_id = %active.id,
                        connected_for_secs = (Utc::now() - active.connected_at).num_seconds(),
                        "disconnecting"
                    );
                    if let Err(e) = self.connector.disconnect(active.handle).await {
                        tracing::warn!(connection_id = %active.id, error = %e, "error while disconnecting; clearing active connection anyway");
                    }
                }

                {
                    let mut inner = self.inner.lock();
                    self.transition(&mut inner, ConnectionState::Disconnected);
                    self.registry.set_active(None);
                    self.notifier.queue(ConnectionEvent::ConnectionsChanged);
                    self.notifier.queue(ConnectionEvent::ActiveConnectionChanged {
                        active: None,
                        error: None,
                    });
                }
                self.notifier.flush();
                Ok(DisconnectOutcome::Disconnected)
            }
        }
    }

    /// Abandon the pending connect attempt, if any.
    ///
    /// Returns false when nothing was connecting.
    pub async fn cancel_connection_attempt(&self) -> Result<bool> {
        if !self.is_connecting() {
            return Ok(false);
        }
        let outcome = self.disconnect().await?;
        Ok(outcome == DisconnectOutcome::Disconnected)
    }

    /// Save a new connection
    pub fn add_connection(&self, record: ConnectionRecord) -> Result<Uuid> {
        let id = self.registry.add(record)?;
        self.notifier.emit(ConnectionEvent::ConnectionsChanged);
        Ok(id)
    }

    /// Save a descriptor under the configured default scope
    pub fn save_connection(&self, name: Option<&str>, descriptor: Descriptor) -> Result<Uuid> {
        let scope = self.config.default_scope;
        let record = match name {
            Some(name) => ConnectionRecord::new(name, scope, descriptor)?,
            None => ConnectionRecord::from_descriptor(scope, descriptor)?,
        };
        self.add_connection(record)
    }

    /// Delete a saved connection, disconnecting first if it is in use
    #[tracing::instrument(skip(self), fields(connection_id = %id))]
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        if !self.registry.contains(id) {
            return Err(TetherError::NotFound(id));
        }

        // The record is deleted under the state lock so no attempt for it can
        // start between the in-use check and the removal
        loop {
            {
                let inner = self.inner.lock();
                let in_use = inner.attempt.as_ref().is_some_and(|a| a.connection_id() == id)
                    || inner.active.as_ref().is_some_and(|a| a.id == id);
                if !in_use {
                    self.registry.remove(id)?;
                    break;
                }
            }
            tracing::debug!("connection is in use, disconnecting before removal");
            self.disconnect().await?;
        }

        self.notifier.emit(ConnectionEvent::ConnectionsChanged);
        Ok(())
    }

    /// Change a saved connection's display name
    pub fn rename(&self, id: Uuid, name: &str) -> Result<()> {
        self.registry.rename(id, name)?;
        self.notifier.emit(ConnectionEvent::ConnectionsChanged);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Receive every phase change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn active_connection_id(&self) -> Option<Uuid> {
        self.registry.active_id()
    }

    pub fn active_handle(&self) -> Option<Arc<dyn ConnectionHandle>> {
        self.inner.lock().active.as_ref().map(|a| a.handle.clone())
    }

    pub fn connecting_connection_id(&self) -> Option<Uuid> {
        self.inner.lock().attempt.as_ref().map(|a| a.connection_id())
    }

    /// The attempt currently allowed to settle
    pub fn current_attempt(&self) -> Option<ActiveAttempt> {
        self.inner.lock().attempt.clone()
    }

    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_disconnecting(&self) -> bool {
        self.state() == ConnectionState::Disconnecting
    }

    pub fn saved_connections(&self) -> Vec<ConnectionRecord> {
        self.registry.list()
    }

    pub fn connection(&self, id: Uuid) -> Result<ConnectionRecord> {
        self.registry.get(id)
    }

    pub fn connection_name(&self, id: Uuid) -> Option<String> {
        self.registry
            .get(id)
            .ok()
            .map(|r| r.display_name().to_string())
    }

    pub fn has_saved_connections(&self) -> bool {
        !self.registry.list().is_empty()
    }

    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.notifier.add_listener(kind, listener)
    }

    pub fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.notifier.remove_listener(kind, id)
    }

    fn transition(&self, inner: &mut LifecycleInner, next: ConnectionState) {
        if inner.state != next {
            tracing::debug!(from = %inner.state, to = %next, "connection state changed");
        }
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    /// Invalidate the pending attempt, if any
    fn fence(inner: &mut LifecycleInner) {
        inner.latest_token += 1;
        if let Some(attempt) = inner.attempt.take() {
            tracing::debug!(attempt = attempt.token(), "fencing connect attempt");
            attempt.cancel_token().cancel();
        }
    }

    fn begin_attempt(&self, inner: &mut LifecycleInner, id: Uuid) -> ActiveAttempt {
        if let Some(previous) = inner.attempt.take() {
            tracing::debug!(
                superseded = previous.token(),
                superseded_connection_id = %previous.connection_id(),
                "superseding pending connect attempt"
            );
            previous.cancel_token().cancel();
        }

        inner.latest_token += 1;
        let attempt = ActiveAttempt::new(inner.latest_token, id);
        inner.attempt = Some(attempt.clone());
        self.transition(inner, ConnectionState::Connecting);
        self.notifier.queue(ConnectionEvent::ActiveConnectionChanging {
            previous: self.registry.active_id(),
            next: id,
            attempt: attempt.token(),
        });
        attempt
    }

    async fn run_attempt(
        &self,
        attempt: ActiveAttempt,
        descriptor: &Descriptor,
    ) -> Result<ConnectOutcome> {
        let timeout = self.config.connect_timeout;
        let settled = tokio::select! {
            biased;
            _ = attempt.cancel_token().cancelled() => None,
            result = tokio::time::timeout(timeout, self.connector.connect(descriptor)) => Some(result),
        };

        let result = match settled {
            None => {
                tracing::debug!(attempt = attempt.token(), "connect attempt cancelled before it settled");
                return Ok(ConnectOutcome::Cancelled);
            }
            Some(Ok(result)) => result.map_err(into_connector_error),
            Some(Err(_elapsed)) => Err(TetherError::Connector(format!(
                "Connection attempt timed out after {} ms",
                timeout.as_millis()
            ))),
        };

        self.settle(attempt, result).await
    }

    /// Apply the result of an attempt if it still holds the latest token
    async fn settle(
        &self,
        attempt: ActiveAttempt,
        result: Result<Arc<dyn ConnectionHandle>>,
    ) -> Result<ConnectOutcome> {
        let id = attempt.connection_id();
        let settlement = {
            let mut inner = self.inner.lock();
            if inner.latest_token != attempt.token() {
                Settlement::Stale(result.ok())
            } else {
                inner.attempt = None;
                match result {
                    Ok(handle) => {
                        inner.active = Some(ActiveConnection {
                            id,
                            handle,
                            connected_at: Utc::now(),
                        });
                        self.transition(&mut inner, ConnectionState::Connected);
                        self.registry.set_active(Some(id));
                        self.notifier.queue(ConnectionEvent::ActiveConnectionChanged {
                            active: Some(id),
                            error: None,
                        });
                        Settlement::Connected
                    }
                    Err(e) => {
                        self.transition(&mut inner, ConnectionState::Disconnected);
                        self.registry.set_active(None);
                        self.notifier.queue(ConnectionEvent::ActiveConnectionChanged {
                            active: None,
                            error: Some(e.to_string()),
                        });
                        Settlement::Failed(e)
                    }
                }
            }
        };
        self.notifier.flush();

        match settlement {
            Settlement::Stale(handle) => {
                let stale = TetherError::StaleAttempt {
                    token: attempt.token(),
                };
                tracing::debug!(reason = %stale, "discarding result of superseded attempt");
                if let Some(handle) = handle
                    && let Err(e) = self.connector.disconnect(handle).await
                {
                    tracing::warn!(error = %e, "failed to release handle from superseded attempt");
                }
                Ok(ConnectOutcome::Cancelled)
            }
            Settlement::Connected => {
                tracing::info!("connection established");
                if let Err(e) = self.registry.touch_last_used(id) {
                    tracing::warn!(error = %e, "failed to record last use of connection");
                }
                Ok(ConnectOutcome::Connected(id))
            }
            Settlement::Failed(e) => {
                tracing::error!(error = %e, "failed to connect");
                Err(e)
            }
        }
    }
}

fn into_connector_error(err: TetherError) -> TetherError {
    if matches!(err, TetherError::Connector(_)) {
        err
    } else {
        TetherError::Connector(err.to_string())
    }
}

#[cfg(test)]
mod tests;
