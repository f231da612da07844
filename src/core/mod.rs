//! # Core Components
//!
//! Document model, the document codec and wire framing.
//!
//! ## Components
//! - **Document**: ordered key/value container and its value union
//! - **ObjectId**: 12-byte identifiers
//! - **Bson**: document <-> binary encoding
//! - **Packet**: 16-byte message header plus body
//! - **Codec**: Tokio codec for framing packets over byte streams
//!
//! ## Limits
//! - Maximum nesting depth: 100
//! - Maximum message size: 48 MiB by default, lowered or raised by the server handshake
//! - Length validation before allocation

pub mod bson;
pub mod codec;
pub mod document;
pub mod oid;
pub mod packet;

pub use document::{Document, Value};
pub use oid::ObjectId;
