//! # Transport Layer
//!
//! Sockets to the server and the pool that shares them.
//!
//! ## Components
//! - **Connection**: one framed TCP or TLS stream, one request in flight at a time
//! - **TLS**: rustls client configuration (system roots, CA bundle, mTLS, pinning)
//! - **Pool**: bounded, reusable connections with an acquire timeout

pub mod connection;
pub mod pool;
pub mod tls;

pub use connection::{Connection, ConnectionSettings, Stream};
pub use pool::{ConnectionFactory, ConnectionPool, PooledConnection};
pub use tls::TlsClientConfig;
