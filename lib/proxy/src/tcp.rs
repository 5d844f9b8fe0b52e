use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::{Connection, Proxy, Route};

struct Listener {
  backend: Arc<ArcSwap<SocketAddr>>,
  stop: Arc<Notify>,
}

/// An in-process TCP forwarding `Proxy`. Each route gets its own
/// `TcpListener` task; accepted connections are spliced to the
/// current backend with `tokio::io::copy_bidirectional` and removed
/// from the connection table when either side closes.
pub struct TcpProxy {
  listen_addr: SocketAddr,
  active: DashMap<u16, Listener>,
  pending: Mutex<Vec<Route>>,
  connections: Arc<DashMap<u64, Connection>>,
  next_conn_id: Arc<AtomicU64>,
}

impl TcpProxy {
  /// `listen_addr`'s port is ignored; each route binds its own port
  /// on `listen_addr`'s IP.
  pub fn new(listen_addr: SocketAddr) -> Self {
    TcpProxy {
      listen_addr,
      active: DashMap::new(),
      pending: Mutex::new(Vec::new()),
      connections: Arc::new(DashMap::new()),
      next_conn_id: Arc::new(AtomicU64::new(0)),
    }
  }

  async fn spawn_listener(&self, port: u16, backend: SocketAddr) -> anyhow::Result<Listener> {
    let mut bind_addr = self.listen_addr;
    bind_addr.set_port(port);
    let listener = TcpListener::bind(bind_addr).await?;

    let backend = Arc::new(ArcSwap::from_pointee(backend));
    let stop = Arc::new(Notify::new());

    let task_backend = backend.clone();
    let task_stop = stop.clone();
    let connections = self.connections.clone();
    let next_conn_id = self.next_conn_id.clone();

    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = task_stop.notified() => break,
          accepted = listener.accept() => {
            let (inbound, laddr) = match accepted {
              Ok(pair) => pair,
              Err(e) => {
                warn!(%e, port, "accept failed");
                continue;
              }
            };
            let raddr = **task_backend.load();
            let conn_id = next_conn_id.fetch_add(1, Ordering::SeqCst);
            connections.insert(conn_id, Connection { laddr, raddr });
            let connections = connections.clone();
            tokio::spawn(async move {
              if let Ok(mut outbound) = tokio::net::TcpStream::connect(raddr).await {
                let mut inbound = inbound;
                let _ = io::copy_bidirectional(&mut inbound, &mut outbound).await;
              }
              connections.remove(&conn_id);
            });
          }
        }
      }
      debug!(port, "proxy listener stopped");
    });

    Ok(Listener { backend, stop })
  }
}

#[async_trait]
impl Proxy for TcpProxy {
  async fn clear_routes(&self) {
    self.pending.lock().await.clear();
  }

  async fn add_route(&self, route: Route) {
    self.pending.lock().await.push(route);
  }

  async fn commit(&self) -> anyhow::Result<()> {
    let pending = self.pending.lock().await.clone();
    let desired: HashMap<u16, SocketAddr> =
      pending.iter().map(|r| (r.listen_port, r.backend)).collect();

    let stale: Vec<u16> = self
      .active
      .iter()
      .map(|e| *e.key())
      .filter(|port| !desired.contains_key(port))
      .collect();
    for port in stale {
      if let Some((_, listener)) = self.active.remove(&port) {
        listener.stop.notify_one();
      }
    }

    for (port, backend) in desired {
      if let Some(listener) = self.active.get(&port) {
        listener.backend.store(Arc::new(backend));
      } else {
        let listener = self.spawn_listener(port, backend).await?;
        self.active.insert(port, listener);
      }
    }
    Ok(())
  }

  async fn shutdown(&self) {
    for entry in self.active.iter() {
      entry.value().stop.notify_one();
    }
    self.active.clear();
  }

  async fn connections(&self) -> Vec<Connection> {
    self.connections.iter().map(|e| *e.value()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpStream;

  async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      loop {
        let (mut socket, _) = match listener.accept().await {
          Ok(pair) => pair,
          Err(_) => return,
        };
        tokio::spawn(async move {
          let mut buf = [0u8; 1024];
          loop {
            match socket.read(&mut buf).await {
              Ok(0) | Err(_) => return,
              Ok(n) => {
                if socket.write_all(&buf[..n]).await.is_err() {
                  return;
                }
              }
            }
          }
        });
      }
    });
    addr
  }

  #[tokio::test]
  async fn forwards_traffic_to_backend() {
    let backend = echo_server().await;
    let proxy = TcpProxy::new("127.0.0.1:0".parse().unwrap());
    proxy.clear_routes().await;
    proxy
      .add_route(Route {
        listen_port: 18080,
        backend,
      })
      .await;
    proxy.commit().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:18080").await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    proxy.shutdown().await;
  }

  #[tokio::test]
  async fn connection_table_tracks_open_connections() {
    let backend = echo_server().await;
    let proxy = TcpProxy::new("127.0.0.1:0".parse().unwrap());
    proxy.clear_routes().await;
    proxy
      .add_route(Route {
        listen_port: 18081,
        backend,
      })
      .await;
    proxy.commit().await.unwrap();

    let mut client = TcpStream::connect("127.0.0.1:18081").await.unwrap();
    client.write_all(b"x").await.unwrap();
    let mut buf = [0u8; 1];
    client.read_exact(&mut buf).await.unwrap();

    let conns = proxy.connections().await;
    assert_eq!(conns.len(), 1);
    assert_eq!(conns[0].raddr, backend);

    drop(client);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(proxy.connections().await.is_empty());

    proxy.shutdown().await;
  }

  #[tokio::test]
  async fn commit_removes_routes_dropped_from_the_staged_table() {
    let backend = echo_server().await;
    let proxy = TcpProxy::new("127.0.0.1:0".parse().unwrap());
    proxy.clear_routes().await;
    proxy
      .add_route(Route {
        listen_port: 18082,
        backend,
      })
      .await;
    proxy.commit().await.unwrap();
    assert!(TcpStream::connect("127.0.0.1:18082").await.is_ok());

    proxy.clear_routes().await;
    proxy.commit().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(TcpStream::connect("127.0.0.1:18082").await.is_err());
  }
}
