//! # Utility Modules
//!
//! Supporting utilities for compression, logging, metrics, and timing.
//!
//! ## Components
//! - **Compression**: `noop` and `zstd` wire compressors with output limits
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Async timeout wrappers
//!
//! ## Security
//! - Decompression bomb protection (bounded by the negotiated message size)
//! - Memory zeroing for credentials (zeroize crate)

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use compression::Compressor;
pub use metrics::{global_metrics, Timer};
