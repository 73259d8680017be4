//! estuary — federated terminal group chat.
//!
//! One shared room per server, servers federated into one namespace.
//! Users connect over a line-oriented terminal transport, get an
//! anonymous `Anonymous####` name, and may claim their GitHub login via
//! the device-code flow — which evicts any squatter holding that name,
//! anywhere in the federation.

pub mod config;
pub mod federation;
pub mod room;
pub mod server;
