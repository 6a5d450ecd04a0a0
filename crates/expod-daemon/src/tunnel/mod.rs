//! Public tunnels for dev servers
//!
//! - [`TunnelConnector`] - bounded-retry connect state machine
//! - [`TunnelProvider`] / [`NgrokProvider`] - the external tunnel agent
//! - [`KeyValueStore`] - where the hostname randomness is persisted

pub mod connector;
pub mod provider;
pub mod store;

pub use connector::{
    CollisionPredicate, ConnectOptions, TunnelConfig, TunnelConnector, TunnelSession,
    TunnelState, DEFAULT_MAX_ATTEMPTS, DEFAULT_TUNNEL_DOMAIN, DEFAULT_TUNNEL_TIMEOUT,
    TUNNEL_TIMEOUT_ENV,
};
pub use provider::{NgrokProvider, TunnelProvider, TunnelRequest};
pub use store::{KeyValueStore, MemoryStore, URL_RANDOMNESS_KEY};
