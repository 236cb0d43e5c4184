//! WebSocket connector and connection

use crate::error::{Result, TransportError};
use crate::traits::{Connector, Transport};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

/// Path of the agent endpoint on the control plane
pub const AGENT_PATH: &str = "/api/diragent";

/// Name of the query parameter carrying the agent token
const AUTH_PARAM: &str = "auth";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket connections to the control plane
///
/// The server URL's path and query are replaced: the path by [`AGENT_PATH`]
/// and the query by the `auth` token. `http`/`https` map to `ws`/`wss`.
pub struct WebSocketConnector {
    endpoint: SecretString,
    redacted: String,
}

impl WebSocketConnector {
    /// Build a connector for `server`, authenticating with `token`
    pub fn new(server: &str, token: &SecretString) -> Result<Self> {
        let token = token.expose_secret();
        let endpoint = agent_url(server, token)?;
        let redacted = agent_url(server, &"**".repeat(token.len()))?;
        Ok(Self {
            endpoint: SecretString::new(endpoint.to_string().into_boxed_str()),
            redacted: redacted.to_string(),
        })
    }

    /// The endpoint with the token masked, safe for logs
    pub fn redacted_url(&self) -> &str {
        &self.redacted
    }
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("endpoint", &self.redacted)
            .finish()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self) -> Result<WebSocketTransport> {
        debug!(url = %self.redacted, "dialing control plane");
        let (stream, response) = tokio_tungstenite::connect_async(self.endpoint.expose_secret())
            .await
            .map_err(|err| {
                TransportError::Connection(format!(
                    "cannot connect to server {:?}: {}",
                    self.redacted, err
                ))
            })?;
        info!(url = %self.redacted, status = %response.status(), "connected");

        let (writer, reader) = stream.split();
        Ok(WebSocketTransport { reader, writer })
    }
}

/// One established websocket connection
///
/// The stream is split so the read half can be polled while the write half
/// stays behind `&mut self`.
pub struct WebSocketTransport {
    reader: SplitStream<WsStream>,
    writer: SplitSink<WsStream, Message>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn recv(&mut self) -> Result<Option<serde_json::Value>> {
        while let Some(frame) = self.reader.next().await {
            let document = match frame {
                Ok(Message::Text(text)) => serde_json::from_str(&text)?,
                Ok(Message::Binary(bytes)) => serde_json::from_slice(&bytes)?,
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed connection");
                    return Ok(None);
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            return Ok(Some(document));
        }
        Ok(None)
    }

    async fn send(&mut self, document: serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(&document)?;
        self.writer.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.writer.close().await {
            Ok(()) => Ok(()),
            Err(err) => match TransportError::from(err) {
                TransportError::Closed => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// Build the agent endpoint for `server` with `token` as the auth parameter
pub fn agent_url(server: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(server).map_err(|err| TransportError::InvalidUrl(format!("{server:?}: {err}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other:?} in {server:?}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl(format!("cannot use scheme {scheme:?}")))?;

    url.set_path(AGENT_PATH);
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair(AUTH_PARAM, token);
    Ok(url)
}
