//! A `reqwest` client that charges every request against a
//! [`throttler::Throttler`] before it goes out on the wire.
//!
//! This is intentionally thin: it does not retry, does not manage
//! auth beyond attaching a bearer token, and does not know anything
//! about the shape of a particular API. It exists so that call sites
//! get throttling for free instead of having to remember to call
//! [`Throttler::execute_task`] themselves.

use std::sync::Arc;

use anyhow::Context;
use serde::{Serialize, de::DeserializeOwned};
use throttler::Throttler;

/// A throttled HTTP client bound to one base address.
#[derive(Debug, Clone)]
pub struct HttpClient {
  address: String,
  token: Option<String>,
  client: reqwest::Client,
  throttler: Arc<Throttler>,
}

impl HttpClient {
  /// `address` is the scheme + host + port the client talks to, eg
  /// `https://api.example.com`. `throttler` is shared with every other
  /// client (HTTP or WebSocket) that must respect the same limits.
  pub fn new(address: impl Into<String>, throttler: Arc<Throttler>) -> Self {
    Self {
      address: address.into(),
      token: None,
      client: reqwest::Client::new(),
      throttler,
    }
  }

  /// Attach a bearer token sent with every subsequent request.
  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.token = Some(token.into());
    self
  }

  /// Blocks on admission under `limit_id`, then issues `GET {address}{path}`
  /// and deserializes the JSON response body as `T`.
  pub async fn get_json<T: DeserializeOwned>(
    &self,
    path: &str,
    limit_id: &str,
  ) -> anyhow::Result<T> {
    let _admission = self
      .throttler
      .execute_task(limit_id)
      .await
      .with_context(|| format!("throttler denied GET {path}"))?;

    let endpoint = format!("{}{path}", self.address);
    let mut req = self.client.get(&endpoint);
    if let Some(token) = &self.token {
      req = req.bearer_auth(token);
    }

    let res = req
      .send()
      .await
      .with_context(|| format!("failed to GET {endpoint}"))?
      .error_for_status()
      .with_context(|| format!("GET {endpoint} returned an error status"))?;

    tracing::trace!("GET {endpoint} -> {}", res.status());

    res
      .json::<T>()
      .await
      .with_context(|| format!("failed to parse response body from {endpoint}"))
  }

  /// Blocks on admission under `limit_id`, then issues
  /// `POST {address}{path}` with `body` serialized as JSON, and
  /// deserializes the JSON response body as `T`.
  pub async fn post_json<B: Serialize, T: DeserializeOwned>(
    &self,
    path: &str,
    limit_id: &str,
    body: &B,
  ) -> anyhow::Result<T> {
    let _admission = self
      .throttler
      .execute_task(limit_id)
      .await
      .with_context(|| format!("throttler denied POST {path}"))?;

    let endpoint = format!("{}{path}", self.address);
    let mut req = self.client.post(&endpoint).json(body);
    if let Some(token) = &self.token {
      req = req.bearer_auth(token);
    }

    let res = req
      .send()
      .await
      .with_context(|| format!("failed to POST {endpoint}"))?
      .error_for_status()
      .with_context(|| format!("POST {endpoint} returned an error status"))?;

    tracing::trace!("POST {endpoint} -> {}", res.status());

    res
      .json::<T>()
      .await
      .with_context(|| format!("failed to parse response body from {endpoint}"))
  }
}
