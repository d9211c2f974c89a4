//! Tether Core - shared types for the connection lifecycle crates
//!
//! This crate provides the vocabulary every other tether crate depends on:
//!
//! - `TetherError` - the error taxonomy surfaced by lifecycle operations
//! - `StorageScope` - which persistence tier owns a record's metadata
//! - `Descriptor` - opaque connection target plus its auth parameters
//! - `Connector` - the capability used to open and close live handles

mod connector;
mod descriptor;
mod error;
mod scope;

pub use connector::*;
pub use descriptor::*;
pub use error::*;
pub use scope::*;
