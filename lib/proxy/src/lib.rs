//! The load-balancing proxy abstraction (§4.5): a desired route table
//! that gets staged then committed atomically, plus the live
//! connection table the `connection` termination check (§6.4) polls
//! to decide when a draining container is safe to stop.
//!
//! The upstream implementation shells out to HAProxy with a templated
//! config file. This crate replaces that with an in-process Tokio TCP
//! forwarder: same external contract (`clear_routes`/`add_route`/
//! `commit`/`shutdown`/`connections`), no subprocess or config file.

mod tcp;

use std::net::SocketAddr;

use async_trait::async_trait;

pub use tcp::TcpProxy;

/// A single externally-reachable listen port forwarding to one
/// backend address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
  pub listen_port: u16,
  pub backend: SocketAddr,
}

/// A single spliced connection through the proxy, as surfaced to the
/// `connection` check (§6.4): "containers with zero open connections
/// whose remote address is the container's address are safe to stop".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
  pub laddr: SocketAddr,
  pub raddr: SocketAddr,
}

/// The routing table a `ComponentWatcher` drives (§4.5). Routes are
/// staged with `add_route` after a `clear_routes`, then applied with a
/// single `commit` so listeners never observe a half-updated table.
#[async_trait]
pub trait Proxy: Send + Sync {
  async fn clear_routes(&self);

  async fn add_route(&self, route: Route);

  /// Applies the staged route table: starts listeners for new ports,
  /// retargets existing ones, and stops listeners for ports no longer
  /// staged.
  async fn commit(&self) -> anyhow::Result<()>;

  /// Stops every listener. Called once at process shutdown.
  async fn shutdown(&self);

  /// Connections currently being forwarded.
  async fn connections(&self) -> Vec<Connection>;
}
