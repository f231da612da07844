//! # Protocol Layer
//!
//! Everything that gives bytes on a connection their meaning.
//!
//! ## Components
//! - **Message**: OP_MSG, OP_QUERY, OP_REPLY and OP_COMPRESSED bodies
//! - **Reply**: the `ok` contract, command errors, write error aggregation
//! - **Command**: command documents and single-command execution
//! - **Hello**: connection handshake and server limits
//! - **Handshake**: SCRAM-SHA-1 / SCRAM-SHA-256 state machine
//! - **Auth**: SASL conversation over a connection

pub mod auth;
pub mod command;
pub mod handshake;
pub mod hello;
pub mod message;
pub mod reply;
