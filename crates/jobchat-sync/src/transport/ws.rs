//! WebSocket transport against the gateway. Frames are JSON text, one
//! [`ChannelEvent`] or [`ChannelCommand`] each.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use jobchat_types::events::{ChannelCommand, ChannelEvent};

use crate::config::ClientConfig;
use crate::connection::{Connector, Credentials, Link};
use crate::error::ConnectionError;

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.gateway_url.clone())
    }
}

impl Connector for WsConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Link, ConnectionError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Unreachable(format!("bad gateway url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.token))
            .map_err(|_| ConnectionError::Rejected("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request).await.map_err(map_connect_error)?;
        info!("connected to gateway at {}", self.url);

        let (mut sink, mut source) = stream.split();
        let (outbound, mut commands) = mpsc::unbounded_channel::<ChannelCommand>();
        let (events, inbound) = mpsc::unbounded_channel::<ChannelEvent>();
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    command = commands.recv() => {
                        let Some(command) = command else { break };
                        let text = match serde_json::to_string(&command) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "failed to encode command");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
            debug!("gateway writer finished");
        });

        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ChannelEvent>(text.as_str()) {
                                Ok(event) => {
                                    trace!(kind = ?event.kind(), "gateway event");
                                    if events.send(event).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "dropping malformed gateway frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "gateway read failed");
                            break;
                        }
                    }
                }
            }
            // Stop the writer as well; dropping `events` closes the link.
            reader_shutdown.cancel();
            debug!("gateway reader finished");
        });

        Ok(Link {
            outbound,
            inbound,
            shutdown,
        })
    }
}

fn map_connect_error(e: tungstenite::Error) -> ConnectionError {
    match e {
        tungstenite::Error::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            ConnectionError::Rejected(format!("gateway answered {}", response.status()))
        }
        other => ConnectionError::Unreachable(other.to_string()),
    }
}
