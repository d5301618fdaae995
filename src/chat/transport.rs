//! Line transport seam and its WebSocket implementation
//!
//! The chat protocol only needs "send a line" and "receive the next line".
//! Each WebSocket text frame carries one line.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outgoing half of a line transport
#[async_trait]
pub trait LineSink: Send {
    async fn send_line(&mut self, line: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Incoming half of a line transport
#[async_trait]
pub trait LineSource: Send {
    /// Next line, `None` once the peer has closed
    async fn recv_line(&mut self) -> Result<Option<String>>;
}

/// Opens line transports
#[async_trait]
pub trait LineConnector: Send + Sync {
    async fn open(&self, url: &str) -> Result<(Box<dyn LineSink>, Box<dyn LineSource>)>;
}

/// `LineConnector` over WebSocket (TLS via rustls)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl LineConnector for WsConnector {
    async fn open(&self, url: &str) -> Result<(Box<dyn LineSink>, Box<dyn LineSource>)> {
        let (stream, response) = connect_async(url).await?;
        tracing::debug!(url = %url, status = %response.status(), "WebSocket connected");

        let (sink, source) = stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { source })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl LineSink for WsSink {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.sink.send(Message::Text(line.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

struct WsSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl LineSource for WsSource {
    async fn recv_line(&mut self) -> Result<Option<String>> {
        while let Some(message) = self.source.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text.to_string())),
                Message::Binary(data) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "WebSocket closed by peer");
                    return Ok(None);
                }
                // Pings are answered by tungstenite
                _ => continue,
            }
        }
        Ok(None)
    }
}
