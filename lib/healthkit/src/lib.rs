//! Health, readiness and termination checks (§6.3), and termination
//! signals (§6.4), dispatched by `CheckSpec.kind` (§2.3).
//!
//! A check answers "has this condition been met, right now" — the
//! caller owns the retry loop and the `timeout` field's meaning as the
//! *sleep between attempts*, not a per-attempt network timeout.

use std::net::SocketAddr;
use std::time::Duration;

use dockerengine::ContainerEngine;
use entities::CheckSpec;
use proxy::Proxy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
  #[error("unknown check kind: {0}")]
  UnknownKind(String),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

/// What a check needs to know about the container it's evaluating.
pub struct CheckContext<'a> {
  pub container_id: &'a str,
  pub container_ip: &'a str,
}

/// Runs a single attempt of a health/ready/termination-wait check.
/// Returns `Ok(true)` if the condition currently holds.
pub async fn run_check(
  spec: &CheckSpec,
  ctx: &CheckContext<'_>,
  proxy: Option<&dyn Proxy>,
) -> Result<bool, CheckError> {
  match spec.kind.as_str() {
    "tcp" => tcp_check(spec, ctx).await,
    "http" => http_check(spec, ctx, false).await,
    "https" => http_check(spec, ctx, true).await,
    "connection" => connection_check(ctx, proxy).await,
    other => Err(CheckError::UnknownKind(other.to_string())),
  }
}

/// Fires a termination signal at a container (§6.4): `http`/`https`
/// ask it to shut down gracefully over HTTP, `exec` runs a command
/// inside it (e.g. `nginx -s quit`).
pub async fn run_termination_signal(
  spec: &CheckSpec,
  ctx: &CheckContext<'_>,
  engine: &dyn ContainerEngine,
) -> Result<(), CheckError> {
  match spec.kind.as_str() {
    "http" => http_signal(spec, ctx, false).await,
    "https" => http_signal(spec, ctx, true).await,
    "exec" => {
      let command = spec
        .extra_str("exec_command")
        .ok_or_else(|| anyhow::anyhow!("exec termination signal missing `exec_command`"))?;
      engine.exec(ctx.container_id, command).await?;
      Ok(())
    }
    other => Err(CheckError::UnknownKind(other.to_string())),
  }
}

/// Per-attempt network timeout for tcp/http(s) checks, matching the
/// original `networkcheck.py`'s `timeout=2`.
const NETWORK_TIMEOUT: Duration = Duration::from_secs(2);

async fn tcp_check(spec: &CheckSpec, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
  let port = spec
    .extra_u64("port")
    .ok_or_else(|| anyhow::anyhow!("tcp check missing `port`"))? as u16;
  let addr: SocketAddr = format!("{}:{port}", ctx.container_ip)
    .parse()
    .map_err(|e| anyhow::anyhow!("invalid address: {e}"))?;
  Ok(
    tokio::time::timeout(NETWORK_TIMEOUT, tokio::net::TcpStream::connect(addr))
      .await
      .map(|r| r.is_ok())
      .unwrap_or(false),
  )
}

async fn http_check(
  spec: &CheckSpec,
  ctx: &CheckContext<'_>,
  tls: bool,
) -> Result<bool, CheckError> {
  let (url, client) = http_target(spec, ctx, tls)?;
  Ok(match client.get(&url).send().await {
    Ok(resp) => resp.status().is_success(),
    Err(error) => {
      tracing::debug!(%url, %error, "http check failed");
      false
    }
  })
}

/// `http`/`https` termination signal (§6.4): POSTs an empty body to ask
/// a container to shut down gracefully, mirroring the original
/// `HttpTerminationSignal`'s `urllib2.Request(address, data='')`. The
/// response is not inspected; the caller's own ready/health checks are
/// what decide whether shutdown actually happened.
async fn http_signal(spec: &CheckSpec, ctx: &CheckContext<'_>, tls: bool) -> Result<(), CheckError> {
  let (url, client) = http_target(spec, ctx, tls)?;
  if let Err(error) = client.post(&url).body("").send().await {
    tracing::debug!(%url, %error, "http termination signal failed");
  }
  Ok(())
}

fn http_target(
  spec: &CheckSpec,
  ctx: &CheckContext<'_>,
  tls: bool,
) -> Result<(String, reqwest::Client), CheckError> {
  let port = spec
    .extra_u64("port")
    .ok_or_else(|| anyhow::anyhow!("http check missing `port`"))?;
  let path = spec.extra_str("path").unwrap_or("/");
  let scheme = if tls { "https" } else { "http" };
  let url = format!("{scheme}://{}:{port}{path}", ctx.container_ip);

  let client = reqwest::Client::builder()
    .danger_accept_invalid_certs(tls)
    .timeout(NETWORK_TIMEOUT)
    .build()
    .map_err(anyhow::Error::from)?;

  Ok((url, client))
}

async fn connection_check(
  ctx: &CheckContext<'_>,
  proxy: Option<&dyn Proxy>,
) -> Result<bool, CheckError> {
  let Some(proxy) = proxy else {
    return Ok(true);
  };
  let still_connected = proxy
    .connections()
    .await
    .iter()
    .any(|c| c.raddr.ip().to_string() == ctx.container_ip);
  Ok(!still_connected)
}

#[cfg(test)]
mod tests {
  use super::*;
  use proxy::{Connection, Route};
  use std::net::SocketAddr;

  struct StubProxy {
    connections: Vec<Connection>,
  }

  #[async_trait::async_trait]
  impl Proxy for StubProxy {
    async fn clear_routes(&self) {}
    async fn add_route(&self, _route: Route) {}
    async fn commit(&self) -> anyhow::Result<()> {
      Ok(())
    }
    async fn shutdown(&self) {}
    async fn connections(&self) -> Vec<Connection> {
      self.connections.clone()
    }
  }

  #[tokio::test]
  async fn connection_check_passes_when_no_proxy_present() {
    let ctx = CheckContext {
      container_id: "abc",
      container_ip: "10.0.0.5",
    };
    assert!(connection_check(&ctx, None).await.unwrap());
  }

  #[tokio::test]
  async fn connection_check_fails_while_container_has_open_connections() {
    let raddr: SocketAddr = "10.0.0.5:80".parse().unwrap();
    let laddr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
    let stub = StubProxy {
      connections: vec![Connection { laddr, raddr }],
    };
    let ctx = CheckContext {
      container_id: "abc",
      container_ip: "10.0.0.5",
    };
    assert!(!connection_check(&ctx, Some(&stub)).await.unwrap());
  }

  #[tokio::test]
  async fn connection_check_passes_once_container_has_no_connections() {
    let raddr: SocketAddr = "10.0.0.9:80".parse().unwrap();
    let laddr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
    let stub = StubProxy {
      connections: vec![Connection { laddr, raddr }],
    };
    let ctx = CheckContext {
      container_id: "abc",
      container_ip: "10.0.0.5",
    };
    assert!(connection_check(&ctx, Some(&stub)).await.unwrap());
  }

  #[tokio::test]
  async fn unknown_kind_is_rejected() {
    let spec = CheckSpec {
      kind: "carrier-pigeon".to_string(),
      id: "c1".to_string(),
      timeout: 1,
      extras: Default::default(),
    };
    let ctx = CheckContext {
      container_id: "abc",
      container_ip: "10.0.0.5",
    };
    let err = run_check(&spec, &ctx, None).await.unwrap_err();
    assert!(matches!(err, CheckError::UnknownKind(_)));
  }
}
