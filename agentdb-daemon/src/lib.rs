#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

//! # AgentDB Daemon
//!
//! Singleton memory daemon serving [`agentdb_core`] over a Unix-socket
//! JSON-RPC protocol (newline-delimited), plus the auto-reconnecting
//! client used by agent processes.
//!
//! ## Components
//!
//! - [`server`]: socket listener, connection handling, graceful shutdown
//! - [`service`]: RPC dispatch over the core subsystems
//! - [`client`]: discovery, request correlation, reconnection
//! - [`pidfile`]: PID-file lifecycle and liveness probing
//! - [`jsonrpc`]: wire envelope types

pub mod client;
pub mod jsonrpc;
pub mod pidfile;
pub mod server;
pub mod service;

pub use client::{ClientConfig, MemoryClient};
pub use pidfile::{PidFile, PidFileContents};
pub use server::{DaemonServer, ServerState, ShutdownHandle};
pub use service::MemoryService;
