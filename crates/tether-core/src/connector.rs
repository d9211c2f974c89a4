//! Connector capability
//!
//! The lifecycle crates never talk to a data service directly. They hand a
//! [`Descriptor`] to a [`Connector`] and get back an opaque
//! [`ConnectionHandle`] that other consumers (query runners, editors) can
//! downcast to the driver-specific client they expect.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

use crate::{Descriptor, Result};

/// A live connection produced by a [`Connector`]
pub trait ConnectionHandle: Send + Sync {
    /// Access the concrete handle type
    fn as_any(&self) -> &dyn Any;

    /// Check if the handle has been closed
    fn is_closed(&self) -> bool {
        false
    }
}

/// Opens and closes connections to a data service.
///
/// Implementations should report failures as `TetherError::Connector` with the
/// underlying message; the lifecycle layer passes that message through
/// unmodified. The future returned by `connect` may be dropped before it
/// completes when the attempt is superseded, so implementations that hold
/// resources across await points should release them on drop.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection to the endpoint described by `descriptor`
    async fn connect(&self, descriptor: &Descriptor) -> Result<Arc<dyn ConnectionHandle>>;

    /// Release a handle previously returned by `connect`
    async fn disconnect(&self, handle: Arc<dyn ConnectionHandle>) -> Result<()>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for Arc<T> {
    async fn connect(&self, descriptor: &Descriptor) -> Result<Arc<dyn ConnectionHandle>> {
        (**self).connect(descriptor).await
    }

    async fn disconnect(&self, handle: Arc<dyn ConnectionHandle>) -> Result<()> {
        (**self).disconnect(handle).await
    }
}
