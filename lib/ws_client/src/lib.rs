//! A `tokio-tungstenite` client that charges every connection attempt
//! against a [`throttler::Throttler`] before it dials out.
//!
//! As thin as [`http_client::HttpClient`]: it opens a connection and
//! hands back the raw stream, split into a sender/receiver pair. It
//! does not reconnect, does not frame application messages, and knows
//! nothing about the shape of a particular protocol - callers that
//! want that layer it on top.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{
  SinkExt, StreamExt,
  stream::{SplitSink, SplitStream},
};
use throttler::Throttler;
use tokio::net::TcpStream;
use tokio_tungstenite::{
  MaybeTlsStream, WebSocketStream, tungstenite::Message,
};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSender = SplitSink<WsStream, Message>;
pub type WsReceiver = SplitStream<WsStream>;

/// A throttled WebSocket client bound to one endpoint URL.
#[derive(Debug, Clone)]
pub struct WsClient {
  url: String,
  throttler: Arc<Throttler>,
}

impl WsClient {
  /// `url` is the full `ws://` or `wss://` endpoint. `throttler` is
  /// shared with every other client (HTTP or WebSocket) that must
  /// respect the same limits.
  pub fn new(url: impl Into<String>, throttler: Arc<Throttler>) -> Self {
    Self {
      url: url.into(),
      throttler,
    }
  }

  /// Blocks on admission under `limit_id`, then dials the endpoint and
  /// splits the resulting stream into independent halves.
  pub async fn connect(
    &self,
    limit_id: &str,
  ) -> anyhow::Result<(WsSender, WsReceiver)> {
    let _admission = self
      .throttler
      .execute_task(limit_id)
      .await
      .with_context(|| {
        format!("throttler denied connection to {}", self.url)
      })?;

    let (stream, response) = tokio_tungstenite::connect_async(&self.url)
      .await
      .with_context(|| format!("failed to connect to {}", self.url))?;

    tracing::trace!(
      "connected to {} -> {}",
      self.url,
      response.status()
    );

    Ok(stream.split())
  }
}

/// Send a single binary message. A free function rather than a method
/// on [`WsSender`] since the sender half is a bare `SplitSink` with no
/// room to hang inherent methods off of.
pub async fn send_binary(
  sender: &mut WsSender,
  bytes: Bytes,
) -> anyhow::Result<()> {
  sender
    .send(Message::Binary(bytes))
    .await
    .context("failed to send message over websocket")
}

pub async fn close(sender: &mut WsSender) -> anyhow::Result<()> {
  sender.close().await.context("failed to close websocket")
}

pub async fn recv_binary(
  receiver: &mut WsReceiver,
) -> anyhow::Result<Option<Bytes>> {
  match receiver.next().await {
    None => Ok(None),
    Some(Ok(Message::Binary(bytes))) => Ok(Some(bytes)),
    Some(Ok(Message::Close(frame))) => {
      tracing::debug!("websocket closed: {frame:?}");
      Ok(None)
    }
    Some(Ok(other)) => {
      anyhow::bail!("unexpected websocket message: {other:?}")
    }
    Some(Err(e)) => {
      Err(e).context("failed to read message from websocket")
    }
  }
}
