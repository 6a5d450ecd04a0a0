//! Dev server: HTTP routes, message socket, port binding and heartbeat

pub mod backend;
pub mod bundler_server;
pub mod dev_session;
pub mod middleware;
pub mod port;
pub mod socket;

pub use backend::{BundlerBackend, StaticFilesBackend};
pub use bundler_server::{BundlerServer, BundlerServerDeps, DevSessionSetup, TunnelFactory};
pub use dev_session::{DevSession, DevSessionClient, DevSessionInfo, HttpDevSessionClient};
pub use middleware::{ManifestType, RouteContext};
pub use port::{PortChoice, PortRequest, METRO_PORT_ENV};
pub use socket::MessageSocket;
