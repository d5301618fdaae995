//! RTMP transport seam
//!
//! The orchestrator drives a connection through `RtmpConnection` and learns
//! about the relay through an `RtmpHandler` callback object. `TcpDialer` is
//! the shipped implementation.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::message::{ConnectParams, PlayParams, RtmpMessage};

/// Callbacks invoked from the connection's read task
///
/// Implementations must return quickly; they run inline with socket reads.
pub trait RtmpHandler: Send + Sync {
    /// Every message received, control and media alike
    fn on_received(&self, sender: &RtmpSender, msg: &RtmpMessage);

    /// The relay answered `createStream`
    fn on_stream_created(&self, stream_id: u32);

    /// The relay closed the connection
    fn on_closed(&self);
}

/// Queue of outgoing messages drained by the write task
#[derive(Debug, Clone)]
pub struct RtmpSender {
    tx: mpsc::UnboundedSender<RtmpMessage>,
}

impl RtmpSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RtmpMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, msg: RtmpMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::Closed)
    }
}

/// Opens RTMP connections
#[async_trait]
pub trait RtmpDialer: Send + Sync {
    /// Connect and handshake; `chunk_size` is the outgoing chunk size
    async fn dial(
        &self,
        url: &str,
        handler: Arc<dyn RtmpHandler>,
        chunk_size: u32,
    ) -> Result<Box<dyn RtmpConnection>>;
}

/// Commands a play-only client sends
#[async_trait]
pub trait RtmpConnection: Send {
    async fn connect(&mut self, params: &ConnectParams) -> Result<()>;

    /// Request a stream; the id arrives via `RtmpHandler::on_stream_created`
    async fn create_stream(&mut self) -> Result<()>;

    async fn play(&mut self, stream_id: u32, params: &PlayParams) -> Result<()>;

    async fn send(&mut self, msg: RtmpMessage) -> Result<()>;

    /// Close the socket and stop the I/O tasks; repeated calls do nothing
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::create_stream_command;

    #[tokio::test]
    async fn test_sender_reports_closed_queue() {
        let (sender, mut rx) = RtmpSender::channel();
        sender.send(create_stream_command(2.0)).unwrap();
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert!(matches!(
            sender.send(create_stream_command(3.0)),
            Err(Error::Closed)
        ));
    }
}
