//! Websocket transport feeding the sync controller
//!
//! The connection runs as a tokio task. Inbound text frames and lifecycle
//! changes are forwarded as [`ChannelEvent`]s over an unbounded channel in
//! the order they arrive; outbound text is taken from another channel.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Message(String),
    Error(String),
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Artificial delay applied to every inbound frame.
    pub fake_latency: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fake_latency: Duration::ZERO,
        }
    }

    pub fn with_fake_latency(mut self, fake_latency_ms: u64) -> Self {
        self.fake_latency = Duration::from_millis(fake_latency_ms);
        self
    }
}

/// Starts the connection on `runtime`. Dropping every sender of `outbound`
/// closes the socket.
pub fn spawn_connection(
    runtime: &Handle,
    config: ConnectionConfig,
    outbound: mpsc::UnboundedReceiver<String>,
) -> mpsc::UnboundedReceiver<ChannelEvent> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    runtime.spawn(run_connection(config, outbound, events_tx));
    events_rx
}

async fn run_connection(
    config: ConnectionConfig,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    info!("Connecting to {}", config.url);

    let socket = match connect_async(config.url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            error!("Failed to connect to {}: {}", config.url, e);
            let _ = events.send(ChannelEvent::Error(e.to_string()));
            return;
        }
    };

    if events.send(ChannelEvent::Connected).is_err() {
        return;
    }

    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !config.fake_latency.is_zero() {
                        sleep(config.fake_latency).await;
                    }
                    if events.send(ChannelEvent::Message(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed connection: {:?}", frame);
                    let _ = events.send(ChannelEvent::Closed);
                    break;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Error receiving frame: {}", e);
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    let _ = events.send(ChannelEvent::Closed);
                    break;
                }
            },

            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        error!("Error sending frame: {}", e);
                        let _ = events.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = events.send(ChannelEvent::Closed);
                    break;
                }
            },
        }
    }

    debug!("Connection task for {} finished", config.url);
}
