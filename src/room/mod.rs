//! The room — clients, messages, and the hub that arbitrates names.

pub mod auth;
pub mod client;
pub mod commands;
pub mod hub;
pub mod message;
pub mod names;
pub mod session;
