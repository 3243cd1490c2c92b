//! relay-server: WebSocket front end for the session relay.
//!
//! Parses `/relay` and `/bridge` upgrade requests and hands each accepted
//! WebSocket to a [`relay_core::RelayCoordinator`].

pub mod config;
pub mod listener;
pub mod request;
pub mod server;

pub use config::{Overrides, ServerConfig};
pub use server::{BoundListener, RelayServer};
