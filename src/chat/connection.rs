//! One chat protocol session
//!
//! ```text
//! bootstrap ──► open transport ──► hello / challenge answer / heartbeat
//!                                        │
//!                     line 1: 5 fields (token), line 2: 6 fields (session id)
//!                                        │ malformed: close, start over
//!                                        ▼
//!                          guest login, model request, add me
//!                                        │
//!                 ┌──────────────────────┴───────────────────────┐
//!           keepalive task                                 dispatch task
//!        (heartbeat every 10s)                   (Single: one result / Feed: every line)
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use super::bootstrap::Bootstrap;
use super::config::{ChatConfig, MIN_INTERVAL};
use super::line::{self, HEARTBEAT, HELLO, UNDISCLOSED_MARKER};
use super::transport::{LineConnector, LineSink, LineSource};
use crate::error::{Error, Result};

type SharedSink = Arc<Mutex<Box<dyn LineSink>>>;
type Failure = Arc<StdMutex<Option<String>>>;

/// How received lines reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Wait for the single line describing the target
    Single,
    /// Deliver every line in arrival order
    Feed,
}

/// Values negotiated during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub session_id: String,
    /// Request id of the model lookup (unix seconds)
    pub request_id: i64,
}

/// A source of raw protocol messages
#[async_trait]
pub trait MessageFeed: Send {
    /// Next message, `None` once the feed has ended
    async fn next_message(&mut self) -> Result<Option<String>>;
}

/// Established chat connection with its keepalive and dispatch tasks
pub struct ProtocolConnection {
    session: Session,
    sink: SharedSink,
    results: mpsc::Receiver<String>,
    failure: Failure,
    stop_tx: watch::Sender<bool>,
    keepalive: Option<JoinHandle<()>>,
    dispatch: Option<JoinHandle<()>>,
    closed: bool,
}

struct Handshake {
    token: String,
    session_id: String,
    sink: Box<dyn LineSink>,
    source: Box<dyn LineSource>,
}

impl ProtocolConnection {
    /// Run the handshake and start the background tasks
    ///
    /// A malformed server reply restarts the whole sequence, challenge
    /// included, up to `config.max_attempts` times.
    pub async fn connect(
        config: ChatConfig,
        bootstrap: Arc<dyn Bootstrap>,
        connector: Arc<dyn LineConnector>,
        target: Option<&str>,
        mode: DispatchMode,
    ) -> Result<Self> {
        let mut handshake = None;
        for attempt in 1..=config.max_attempts {
            match Self::attempt(&config, bootstrap.as_ref(), connector.as_ref()).await {
                Ok(done) => {
                    handshake = Some(done);
                    break;
                }
                Err(e) if e.is_retryable_handshake() => {
                    tracing::warn!(attempt, error = %e, "Malformed handshake reply, restarting");
                }
                Err(e) => return Err(e),
            }
        }
        let Some(handshake) = handshake else {
            return Err(Error::Connect(format!(
                "handshake failed after {} attempts",
                config.max_attempts
            )));
        };

        let Handshake {
            token,
            session_id,
            mut sink,
            source,
        } = handshake;

        let request_id = chrono::Utc::now().timestamp();
        let logged_in = async {
            sink.send_line(&line::login(&session_id)).await?;
            if let Some(name) = target {
                sink.send_line(&line::model_request(&token, request_id, name))
                    .await?;
                sink.send_line(&line::add_me(&token)).await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        if let Err(e) = logged_in {
            let _ = sink.close().await;
            return Err(e);
        }

        tracing::info!(session_id = %session_id, target = ?target, mode = ?mode, "Chat session established");

        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let failure: Failure = Arc::new(StdMutex::new(None));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, results) = mpsc::channel(config.feed_capacity);

        let keepalive = tokio::spawn(keepalive_loop(
            sink.clone(),
            config.keepalive_interval,
            stop_rx.clone(),
        ));

        let filter = (mode == DispatchMode::Feed && config.filter_request_id)
            .then(|| request_id.to_string());
        let dispatcher = Dispatcher {
            source,
            tx,
            failure: failure.clone(),
            stop: stop_rx,
        };
        let dispatch = match mode {
            DispatchMode::Single => tokio::spawn(dispatcher.single(
                target.map(str::to_string),
                config.model_data_timeout,
            )),
            DispatchMode::Feed => tokio::spawn(dispatcher.feed(filter)),
        };

        Ok(Self {
            session: Session {
                token,
                session_id,
                request_id,
            },
            sink,
            results,
            failure,
            stop_tx,
            keepalive: Some(keepalive),
            dispatch: Some(dispatch),
            closed: false,
        })
    }

    async fn attempt(
        config: &ChatConfig,
        bootstrap: &dyn Bootstrap,
        connector: &dyn LineConnector,
    ) -> Result<Handshake> {
        let challenge = bootstrap.fetch_challenge().await?;
        let host = bootstrap.fetch_relay_host().await?;
        let url = config.ws_url(&host);

        let (mut sink, mut source) =
            match tokio::time::timeout(config.handshake_timeout, connector.open(&url)).await {
                Ok(opened) => opened?,
                Err(_) => return Err(Error::Connect(format!("opening {} timed out", url))),
            };

        let exchanged = async {
            sink.send_line(HELLO).await?;
            let now_ms = chrono::Utc::now().timestamp_millis();
            sink.send_line(&line::challenge_answer(&challenge, now_ms, &config.site)?)
                .await?;
            sink.send_line(HEARTBEAT).await?;

            let first = recv_handshake_line(source.as_mut(), config.handshake_timeout).await?;
            let token = line::parse_token(&first)?;
            let second = recv_handshake_line(source.as_mut(), config.handshake_timeout).await?;
            let session_id = line::parse_session_id(&second)?;
            Ok::<_, Error>((token, session_id))
        }
        .await;

        match exchanged {
            Ok((token, session_id)) => Ok(Handshake {
                token,
                session_id,
                sink,
                source,
            }),
            Err(e) => {
                if let Err(close_err) = sink.close().await {
                    tracing::debug!(error = %close_err, "Closing failed handshake transport");
                }
                Err(e)
            }
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn token(&self) -> &str {
        &self.session.token
    }

    pub fn request_id(&self) -> i64 {
        self.session.request_id
    }

    /// Wait for the single-mode result, bounded by `timeout`
    ///
    /// An empty string means the target never showed up before the
    /// dispatch deadline.
    pub async fn read_single(&mut self, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => Err(Error::Closed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Transport("response timeout".into())),
        }
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        match self.results.recv().await {
            Some(line) => Ok(Some(line)),
            None => match self.captured_failure() {
                Some(msg) => Err(Error::Transport(msg)),
                None => Ok(None),
            },
        }
    }

    fn captured_failure(&self) -> Option<String> {
        self.failure
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Stop both tasks and close the transport; later calls do nothing
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let _ = self.stop_tx.send(true);
        // Unblocks a dispatch task waiting on a full channel
        self.results.close();

        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!(error = %e, "Error closing chat transport");
        }

        for handle in [self.keepalive.take(), self.dispatch.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Chat task ended abnormally");
            }
        }

        tracing::debug!(session_id = %self.session.session_id, "Chat session closed");
    }
}

#[async_trait]
impl MessageFeed for ProtocolConnection {
    async fn next_message(&mut self) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }
        self.receive().await
    }
}

impl Drop for ProtocolConnection {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.stop_tx.send(true);
        }
    }
}

async fn recv_handshake_line(source: &mut dyn LineSource, timeout: Duration) -> Result<String> {
    match tokio::time::timeout(timeout, source.recv_line()).await {
        Ok(Ok(Some(line))) => Ok(line),
        Ok(Ok(None)) => Err(Error::Connect("transport closed during handshake".into())),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::Connect("handshake reply timeout".into())),
    }
}

async fn keepalive_loop(sink: SharedSink, period: Duration, mut stop: watch::Receiver<bool>) {
    let period = period.max(MIN_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = sink.lock().await.send_line(HEARTBEAT).await {
                    tracing::warn!(error = %e, "Heartbeat failed, keepalive stopped");
                    break;
                }
                tracing::trace!("Heartbeat sent");
            }
        }
    }
}

struct Dispatcher {
    source: Box<dyn LineSource>,
    tx: mpsc::Sender<String>,
    failure: Failure,
    stop: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Deliver one line mentioning `target`, preferring a disclosed status
    async fn single(mut self, target: Option<String>, deadline: Duration) {
        let deadline = tokio::time::sleep(deadline);
        tokio::pin!(deadline);

        let mut remembered: Option<String> = None;
        let mut delivered = false;

        loop {
            tokio::select! {
                _ = self.stop.changed() => break,
                _ = &mut deadline, if !delivered => {
                    delivered = true;
                    tracing::debug!(found = remembered.is_some(), "Model data deadline reached");
                    if self.tx.send(remembered.take().unwrap_or_default()).await.is_err() {
                        break;
                    }
                }
                received = self.source.recv_line() => {
                    let Some(line) = self.accept(received) else { break };
                    if delivered {
                        continue;
                    }
                    let Some(name) = target.as_deref() else { continue };
                    if !line.contains(name) {
                        continue;
                    }
                    if line.contains(UNDISCLOSED_MARKER) {
                        remembered = Some(line);
                        continue;
                    }
                    delivered = true;
                    if self.tx.send(line).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Deliver every line, optionally only replies to `request_id`
    async fn feed(mut self, request_id: Option<String>) {
        loop {
            tokio::select! {
                _ = self.stop.changed() => break,
                received = self.source.recv_line() => {
                    let Some(line) = self.accept(received) else { break };
                    if let Some(id) = request_id.as_deref() {
                        if line::request_id_of(&line) != Some(id) {
                            continue;
                        }
                    }
                    if self.tx.send(line).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Unwrap a received line; `None` ends the loop
    fn accept(&self, received: Result<Option<String>>) -> Option<String> {
        match received {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                tracing::info!("Chat transport closed by peer");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Chat transport failed");
                let mut slot = self
                    .failure
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *slot = Some(e.to_string());
                None
            }
        }
    }
}
