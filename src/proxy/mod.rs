//! Proxy Module
//!
//! Relays many concurrent inbound stream connections to one fixed target.

pub mod dispatcher;

pub use dispatcher::{serve_proxy, serve_proxy_until, ProxyDispatcher, ProxySessionState};
