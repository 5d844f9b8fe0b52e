use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{KvError, KvStore};

fn encode(s: &str) -> String {
  B64.encode(s.as_bytes())
}

fn decode(s: &str) -> anyhow::Result<String> {
  let bytes = B64.decode(s)?;
  Ok(String::from_utf8(bytes)?)
}

#[derive(Debug, Deserialize)]
struct RangeKv {
  key: String,
  value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
  #[serde(default)]
  kvs: Vec<RangeKv>,
}

#[derive(Debug, Deserialize)]
struct LeaseGrantResponse {
  #[serde(rename = "ID")]
  id: String,
}

#[derive(Debug, Serialize)]
struct Compare {
  key: String,
  target: &'static str,
  result: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxnResponse {
  succeeded: bool,
}

/// A `KvStore` talking to etcd's v3 JSON gateway (`/v3/kv/...`) over
/// plain HTTP, as exposed by `etcd --listen-client-http-urls`. Values
/// and keys are base64-encoded on the wire per the gateway's grpc-json
/// mapping.
pub struct EtcdStore {
  base_url: String,
  client: reqwest::Client,
}

impl EtcdStore {
  pub fn new(base_url: impl Into<String>) -> Self {
    EtcdStore {
      base_url: base_url.into(),
      client: reqwest::Client::new(),
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url.trim_end_matches('/'), path)
  }

  async fn lease_grant(&self, ttl_secs: u64) -> anyhow::Result<String> {
    let resp: LeaseGrantResponse = self
      .client
      .post(self.url("/v3/lease/grant"))
      .json(&json!({ "TTL": ttl_secs.to_string() }))
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    Ok(resp.id)
  }
}

#[async_trait]
impl KvStore for EtcdStore {
  async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
    let resp: RangeResponse = self
      .client
      .post(self.url("/v3/kv/range"))
      .json(&json!({ "key": encode(key) }))
      .send()
      .await
      .map_err(anyhow::Error::from)?
      .error_for_status()
      .map_err(anyhow::Error::from)?
      .json()
      .await
      .map_err(anyhow::Error::from)?;

    match resp.kvs.into_iter().next() {
      Some(kv) => {
        let value = kv.value.unwrap_or_default();
        Ok(Some(decode(&value).map_err(anyhow::Error::from)?))
      }
      None => Ok(None),
    }
  }

  async fn set(
    &self,
    key: &str,
    value: &str,
    ttl_secs: Option<u64>,
  ) -> Result<(), KvError> {
    let lease = match ttl_secs {
      Some(secs) => Some(self.lease_grant(secs).await.map_err(KvError::from)?),
      None => None,
    };
    let mut body = json!({
      "key": encode(key),
      "value": encode(value),
    });
    if let Some(lease) = lease {
      body["lease"] = json!(lease);
    }
    self
      .client
      .post(self.url("/v3/kv/put"))
      .json(&body)
      .send()
      .await
      .map_err(anyhow::Error::from)?
      .error_for_status()
      .map_err(anyhow::Error::from)?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), KvError> {
    self
      .client
      .post(self.url("/v3/kv/deleterange"))
      .json(&json!({ "key": encode(key) }))
      .send()
      .await
      .map_err(anyhow::Error::from)?
      .error_for_status()
      .map_err(anyhow::Error::from)?;
    Ok(())
  }

  async fn compare_and_set(
    &self,
    key: &str,
    expected: Option<&str>,
    new_value: &str,
  ) -> Result<(), KvError> {
    let compare = match expected {
      Some(value) => Compare {
        key: encode(key),
        target: "VALUE",
        result: "EQUAL",
        value: Some(encode(value)),
      },
      // "must not exist" is expressed as the key's creation revision
      // being zero.
      None => Compare {
        key: encode(key),
        target: "CREATE",
        result: "EQUAL",
        value: None,
      },
    };

    let body = json!({
      "compare": [compare],
      "success": [{
        "request_put": {
          "key": encode(key),
          "value": encode(new_value),
        }
      }],
    });

    let resp: TxnResponse = self
      .client
      .post(self.url("/v3/kv/txn"))
      .json(&body)
      .send()
      .await
      .map_err(anyhow::Error::from)?
      .error_for_status()
      .map_err(anyhow::Error::from)?
      .json()
      .await
      .map_err(anyhow::Error::from)?;

    if resp.succeeded {
      Ok(())
    } else {
      let found = self.get(key).await?;
      debug!(key, ?expected, ?found, "compare-and-set conflict");
      Err(KvError::CasConflict {
        key: key.to_string(),
        expected: expected.map(str::to_string),
        found,
      })
    }
  }

  async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, KvError> {
    // range_end = prefix with its last byte incremented, per etcd's
    // prefix-scan convention.
    let mut end = prefix.as_bytes().to_vec();
    if let Some(last) = end.last_mut() {
      *last += 1;
    }
    let range_end = String::from_utf8_lossy(&end).into_owned();

    let resp: RangeResponse = self
      .client
      .post(self.url("/v3/kv/range"))
      .json(&json!({
        "key": encode(prefix),
        "range_end": encode(&range_end),
      }))
      .send()
      .await
      .map_err(anyhow::Error::from)?
      .error_for_status()
      .map_err(anyhow::Error::from)?
      .json()
      .await
      .map_err(anyhow::Error::from)?;

    resp
      .kvs
      .into_iter()
      .map(|kv| {
        let key = decode(&kv.key).map_err(anyhow::Error::from)?;
        let value = decode(&kv.value.unwrap_or_default()).map_err(anyhow::Error::from)?;
        Ok((key, value))
      })
      .collect()
  }
}
