//! Shared library surface for the `vtd` server binary and the `fwd`
//! reference client: PTY lifecycle, framed IPC, buffer broadcast, and the
//! HTTP/WebSocket surface all live here so both binaries link the same code
//! instead of duplicating it.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod http;
pub mod ipc;
pub mod ipc_server;
pub mod pty;
pub mod session;
pub mod terminal;
pub mod urlhelper;
