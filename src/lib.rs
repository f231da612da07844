//! # docwire
//!
//! Async client core for a document-database wire protocol.
//!
//! ## Layers
//! - [`core`]: ordered documents, ObjectIds, the binary document codec and message framing
//! - [`transport`]: TCP/TLS connections and the connection pool
//! - [`protocol`]: message opcodes, replies, handshake, SCRAM authentication, command builders
//! - [`service`]: the command executor, cursors and the `Client` facade
//! - [`utils`]: compression, logging, metrics and timeouts
//!
//! Every fallible call returns [`Result`], whose error separates transport,
//! encoding, authentication and server command failures.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::DriverConfig;
pub use crate::core::document::{Binary, DateTime, Document, Value};
pub use crate::core::oid::ObjectId;
pub use crate::error::{DriverError, Result};
pub use crate::protocol::command::{FindOptions, Namespace, Projection};
pub use crate::service::{Client, Collection, Cursor, Database};
