//! # Service Layer
//!
//! Operations on top of pooled connections.
//!
//! ## Components
//! - **Executor**: CRUD, count, aggregate and cursor commands with typed results
//! - **Cursor**: lazily fetched result sets, `getMore` on demand
//! - **Client**: `Client` / `Database` / `Collection` facade and connection establishment

pub mod client;
pub mod cursor;
pub mod executor;

pub use client::{Client, Collection, Database};
pub use cursor::Cursor;
pub use executor::Executor;
