//! Lifecycle state shared by the controller and its observers

use chrono::{DateTime, Utc};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Phase of the single active connection slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// The connect attempt currently allowed to settle
#[derive(Debug, Clone)]
pub struct ActiveAttempt {
    token: u64,
    connection_id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl ActiveAttempt {
    pub(crate) fn new(token: u64, connection_id: Uuid) -> Self {
        Self {
            token,
            connection_id,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Monotonic fencing token; only the attempt holding the latest one may settle
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// How a connect call ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The attempt settled and its connection is now active
    Connected(Uuid),
    /// A newer connect or a disconnect superseded the attempt
    Cancelled,
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectOutcome::Connected(_))
    }
}

/// How a disconnect call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// This call tore the connection (or attempt) down
    Disconnected,
    /// Another disconnect was already running; this call waited for it
    AlreadyDisconnecting,
    /// Nothing was connected or connecting
    NothingToDisconnect,
}
