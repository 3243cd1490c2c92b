//! relay-tunnel: carries one local TCP connection through a relay session.

pub mod config;
pub mod tunnel;

pub use config::Config;
pub use tunnel::{bind_local, forward, listen, retry, RetryPolicy, TunnelOptions};
