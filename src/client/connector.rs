//! RTMP over TCP
//!
//! ```text
//!            ┌──────────── write task ◄── RtmpSender (unbounded) ◄── TcpConnection / handler
//! socket ────┤
//!            └──────────── read task ──► ChunkDecoder ──► control replies
//!                                                     └──► RtmpHandler callbacks
//! ```
//!
//! The read task answers pings and window acknowledgements itself and turns
//! the `_result` of a pending `createStream` into `on_stream_created`.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::transport::{RtmpConnection, RtmpDialer, RtmpHandler, RtmpSender};
use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::message::{create_stream_command, ConnectParams, PlayParams, RtmpMessage, RtmpUrl};
use crate::protocol::{ChunkDecoder, ChunkEncoder, ClientHandshake};

type Pending = Arc<StdMutex<HashSet<u64>>>;

/// `RtmpDialer` over plain TCP
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl RtmpDialer for TcpDialer {
    async fn dial(
        &self,
        url: &str,
        handler: Arc<dyn RtmpHandler>,
        chunk_size: u32,
    ) -> Result<Box<dyn RtmpConnection>> {
        let parsed = RtmpUrl::parse(url)?;

        let (stream, leftover) = tokio::time::timeout(self.connect_timeout, async {
            let mut stream = TcpStream::connect(parsed.addr()).await?;
            stream.set_nodelay(true)?;
            let leftover = handshake(&mut stream).await?;
            Ok::<_, Error>((stream, leftover))
        })
        .await
        .map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "RTMP connect timeout",
            ))
        })??;

        tracing::info!(url = %url, "RTMP connected");

        let (reader, writer) = stream.into_split();
        let (sender, rx) = RtmpSender::channel();
        let pending: Pending = Arc::new(StdMutex::new(HashSet::new()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let write_task = tokio::spawn(write_loop(writer, rx));
        if chunk_size != DEFAULT_CHUNK_SIZE {
            sender.send(RtmpMessage::set_chunk_size(chunk_size))?;
        }

        let read_loop = ReadLoop {
            handler,
            sender: sender.clone(),
            pending: pending.clone(),
            stop: stop_rx,
        };
        let read_task = tokio::spawn(read_loop.run(reader, leftover));

        Ok(Box::new(TcpConnection {
            url: parsed,
            tc_url: url.to_string(),
            sender: Some(sender),
            pending,
            next_transaction: 2.0,
            stop_tx,
            read_task: Some(read_task),
            write_task: Some(write_task),
        }))
    }
}

/// Simple handshake; returns bytes read past S2
async fn handshake(stream: &mut TcpStream) -> Result<BytesMut> {
    let mut hs = ClientHandshake::new();
    if let Some(c0c1) = hs.generate_initial() {
        stream.write_all(&c0c1).await?;
    }

    let needed = hs.bytes_needed();
    let mut buf = BytesMut::with_capacity(needed * 2);
    while buf.len() < needed {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::Closed);
        }
    }

    let mut reply = buf.split_to(needed).freeze();
    if let Some(c2) = hs.process(&mut reply)? {
        stream.write_all(&c2).await?;
    }
    tracing::debug!("RTMP handshake complete");
    Ok(buf)
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<RtmpMessage>) {
    let mut encoder = ChunkEncoder::new();
    let mut buf = BytesMut::with_capacity(4096);

    while let Some(msg) = rx.recv().await {
        buf.clear();
        encoder.encode(&msg, &mut buf);
        if msg.type_id == MSG_SET_CHUNK_SIZE && msg.payload.len() >= 4 {
            encoder.set_chunk_size((&msg.payload[..4]).get_u32());
        }
        if let Err(e) = writer.write_all(&buf).await {
            tracing::warn!(error = %e, "RTMP write failed");
            break;
        }
    }

    let _ = writer.shutdown().await;
}

struct ReadLoop {
    handler: Arc<dyn RtmpHandler>,
    sender: RtmpSender,
    pending: Pending,
    stop: watch::Receiver<bool>,
}

impl ReadLoop {
    async fn run(mut self, mut reader: OwnedReadHalf, mut buf: BytesMut) {
        let mut decoder = ChunkDecoder::new();
        let mut window: u32 = 0;
        let mut received: u64 = 0;
        let mut last_ack: u64 = 0;

        let peer_closed = 'read: loop {
            loop {
                match decoder.decode(&mut buf) {
                    Ok(Some(msg)) => self.dispatch(&msg, &mut window),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "RTMP decode failed");
                        break 'read true;
                    }
                }
            }

            tokio::select! {
                _ = self.stop.changed() => break 'read false,
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => break 'read true,
                    Ok(n) => {
                        received += n as u64;
                        if window > 0 && received - last_ack >= window as u64 {
                            let _ = self.sender.send(RtmpMessage::acknowledgement(received as u32));
                            last_ack = received;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "RTMP read failed");
                        break 'read true;
                    }
                },
            }
        };

        if peer_closed {
            tracing::info!(bytes = received, "RTMP connection closed by peer");
            self.handler.on_closed();
        }
    }

    fn dispatch(&self, msg: &RtmpMessage, window: &mut u32) {
        match msg.type_id {
            MSG_WINDOW_ACK_SIZE if msg.payload.len() >= 4 => {
                *window = (&msg.payload[..4]).get_u32();
                tracing::debug!(window = *window, "Window ack size");
            }
            MSG_USER_CONTROL if msg.payload.len() >= 6 => {
                let mut payload = &msg.payload[..];
                let event = payload.get_u16();
                let value = payload.get_u32();
                match event {
                    UC_PING_REQUEST => {
                        let _ = self.sender.send(RtmpMessage::ping_response(value));
                    }
                    UC_STREAM_BEGIN => tracing::debug!(stream_id = value, "Stream begin"),
                    _ => {}
                }
            }
            MSG_COMMAND_AMF0 => self.handle_command(msg),
            _ => {}
        }

        self.handler.on_received(&self.sender, msg);
    }

    fn handle_command(&self, msg: &RtmpMessage) {
        let values = match msg.command_values() {
            Ok(values) => values,
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable command");
                return;
            }
        };
        let name = values.first().and_then(|v| v.as_str()).unwrap_or_default();
        let transaction = values.get(1).and_then(|v| v.as_number()).unwrap_or(0.0);

        match name {
            CMD_RESULT => {
                let was_pending = self
                    .pending
                    .lock()
                    .map(|mut pending| pending.remove(&(transaction as u64)))
                    .unwrap_or(false);
                if was_pending {
                    let stream_id = values.get(3).and_then(|v| v.as_number()).unwrap_or(0.0);
                    tracing::debug!(stream_id, "Stream created");
                    self.handler.on_stream_created(stream_id as u32);
                } else if transaction == CONNECT_TRANSACTION_ID {
                    tracing::debug!("Connect accepted");
                }
            }
            CMD_ERROR => {
                let description = values
                    .get(3)
                    .and_then(|v| v.get_string("description"))
                    .unwrap_or_default();
                tracing::warn!(transaction, description = %description, "Command rejected");
            }
            CMD_ON_STATUS => {
                let code = values
                    .get(3)
                    .and_then(|v| v.get_string("code"))
                    .unwrap_or_default();
                tracing::info!(code = %code, "Stream status");
            }
            _ => {}
        }
    }
}

struct TcpConnection {
    url: RtmpUrl,
    tc_url: String,
    sender: Option<RtmpSender>,
    pending: Pending,
    next_transaction: f64,
    stop_tx: watch::Sender<bool>,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
}

impl TcpConnection {
    fn sender(&self) -> Result<&RtmpSender> {
        self.sender.as_ref().ok_or(Error::Closed)
    }
}

#[async_trait]
impl RtmpConnection for TcpConnection {
    async fn connect(&mut self, params: &ConnectParams) -> Result<()> {
        let msg = params.to_message(&self.url, &self.tc_url);
        self.sender()?.send(msg)
    }

    async fn create_stream(&mut self) -> Result<()> {
        let transaction = self.next_transaction;
        self.next_transaction += 1.0;
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(transaction as u64);
        }
        self.sender()?.send(create_stream_command(transaction))
    }

    async fn play(&mut self, stream_id: u32, params: &PlayParams) -> Result<()> {
        tracing::info!(stream_id, path = %params.path, "Playing");
        self.sender()?.send(params.to_message(stream_id))
    }

    async fn send(&mut self, msg: RtmpMessage) -> Result<()> {
        self.sender()?.send(msg)
    }

    async fn close(&mut self) {
        let Some(read_task) = self.read_task.take() else {
            return;
        };

        let _ = self.stop_tx.send(true);
        if let Err(e) = read_task.await {
            tracing::warn!(error = %e, "RTMP read task ended abnormally");
        }

        // Last sender gone: the write task drains and shuts the socket
        self.sender = None;
        if let Some(mut write_task) = self.write_task.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut write_task)
                .await
                .is_err()
            {
                write_task.abort();
            }
        }

        tracing::debug!(url = %self.tc_url, "RTMP connection closed");
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::AmfValue;
    use bytes::BufMut;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedSender;

    struct EventHandler {
        events: UnboundedSender<String>,
    }

    impl RtmpHandler for EventHandler {
        fn on_received(&self, _sender: &RtmpSender, msg: &RtmpMessage) {
            let _ = self.events.send(format!("msg:{}", msg.type_id));
        }

        fn on_stream_created(&self, stream_id: u32) {
            let _ = self.events.send(format!("created:{}", stream_id));
        }

        fn on_closed(&self) {
            let _ = self.events.send("closed".into());
        }
    }

    /// Accepts one client, expects connect + createStream, answers the
    /// latter with stream id 1, then hangs up
    async fn fake_relay(listener: TcpListener) -> Vec<String> {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        socket.read_exact(&mut c0c1).await.unwrap();
        assert_eq!(c0c1[0], RTMP_VERSION);

        let mut reply = BytesMut::new();
        reply.put_u8(RTMP_VERSION);
        reply.put_slice(&[1u8; HANDSHAKE_SIZE]);
        reply.put_slice(&c0c1[1..]);
        socket.write_all(&reply).await.unwrap();

        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        socket.read_exact(&mut c2).await.unwrap();
        assert_eq!(&c2[8..], &[1u8; HANDSHAKE_SIZE][8..]);

        let mut decoder = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut commands = Vec::new();
        while commands.len() < 2 {
            while let Some(msg) = decoder.decode(&mut buf).unwrap() {
                if msg.type_id == MSG_COMMAND_AMF0 {
                    let values = msg.command_values().unwrap();
                    commands.push(values[0].as_str().unwrap().to_string());
                }
            }
            if commands.len() < 2 && socket.read_buf(&mut buf).await.unwrap() == 0 {
                break;
            }
        }
        assert_eq!(decoder.chunk_size(), 100);

        let result = RtmpMessage::command(
            CSID_COMMAND,
            0,
            &[
                AmfValue::from(CMD_RESULT),
                AmfValue::Number(2.0),
                AmfValue::Null,
                AmfValue::Number(1.0),
            ],
        );
        let mut out = BytesMut::new();
        ChunkEncoder::new().encode(&result, &mut out);
        socket.write_all(&out).await.unwrap();
        socket.shutdown().await.unwrap();

        commands
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_dial_connect_and_create_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let relay = tokio::spawn(fake_relay(listener));

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handler = Arc::new(EventHandler { events: events_tx });
        let url = format!("rtmp://127.0.0.1:{}/NxServer", port);

        let mut conn = TcpDialer::default().dial(&url, handler, 100).await.unwrap();
        let params = ConnectParams {
            token: "tok".into(),
            suffix: String::new(),
            room_id: "100000001".into(),
            op_type: "DOWNLOAD".into(),
            model_id: 1,
            flags: 0,
            extra: String::new(),
        };
        conn.connect(&params).await.unwrap();
        conn.create_stream().await.unwrap();

        assert_eq!(next_event(&mut events).await, "created:1");
        assert_eq!(next_event(&mut events).await, format!("msg:{}", MSG_COMMAND_AMF0));
        assert_eq!(next_event(&mut events).await, "closed");

        let commands = relay.await.unwrap();
        assert_eq!(commands, vec!["connect".to_string(), "createStream".to_string()]);

        conn.close().await;
        conn.close().await;
        assert!(conn.send(RtmpMessage::acknowledgement(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_dial_rejects_bad_url() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let handler = Arc::new(EventHandler { events: events_tx });
        let result = TcpDialer::default().dial("http://nope", handler, 128).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
