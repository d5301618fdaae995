//! Recording orchestrator
//!
//! Drives one RTMP session for a resolved target:
//!
//! ```text
//! dial ─► connect ─► loginResult answered ─► createStream ─► play ─► watchdog
//!           │ ≤ challenge_timeout             │ ≤ stream_timeout        │
//!           ▼                                 ▼                         ▼
//!    ChallengeTimeout                  StreamCreateTimeout   peer close │ no bytes
//!                                                              Success  │ NoData
//! ```
//!
//! The connection is closed and the sink finished on every exit path.

use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::oneshot;
use tokio::time::{interval_at, timeout, Instant};

use super::challenge::{ChallengeSolver, ScriptEvaluator};
use super::config::{RecorderConfig, MIN_PERIOD};
use super::target::RtmpTarget;
use super::transport::{RtmpConnection, RtmpDialer, RtmpHandler, RtmpSender};
use crate::error::{Error, Result};
use crate::media::MediaSink;
use crate::protocol::message::{ConnectParams, PlayParams, RtmpMessage};
use crate::session::{MediaCounters, Outcome, RecordingReport, RecordingSession};

type Slot<T> = StdMutex<Option<oneshot::Sender<T>>>;

fn fire<T>(slot: &Slot<T>, value: T) {
    let sender = slot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(value);
    }
}

/// Receive side of one session, called from the connection's read task
struct SessionHandler {
    solver: ChallengeSolver,
    counters: Arc<MediaCounters>,
    sink: StdMutex<Option<Box<dyn MediaSink>>>,
    ready: Slot<Result<()>>,
    created: Slot<u32>,
    closed: Slot<()>,
}

impl SessionHandler {
    fn take_sink(&self) -> Option<Box<dyn MediaSink>> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn on_media(&self, msg: &RtmpMessage) {
        if msg.is_video() {
            self.counters.record_video(msg.payload.len());
        } else {
            self.counters.record_audio(msg.payload.len());
        }

        let mut guard = self
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sink) = guard.as_mut() else {
            return;
        };

        let written = if msg.is_video() {
            sink.write_video_tag(msg.payload.clone(), msg.timestamp)
        } else {
            sink.write_audio_tag(msg.payload.clone(), msg.timestamp)
        };

        // A broken sink stops the file, not the session
        if let Err(e) = written {
            tracing::error!(error = %e, "Media write failed, dropping output");
            if let Some(mut sink) = guard.take() {
                let _ = sink.finish();
            }
        }
    }
}

impl RtmpHandler for SessionHandler {
    fn on_received(&self, sender: &RtmpSender, msg: &RtmpMessage) {
        if msg.is_video() || msg.is_audio() {
            self.on_media(msg);
            return;
        }

        if ChallengeSolver::is_challenge(msg) {
            let answered = self
                .solver
                .answer(&msg.payload)
                .and_then(|reply| sender.send(reply));
            fire(&self.ready, answered);
        }
    }

    fn on_stream_created(&self, stream_id: u32) {
        fire(&self.created, stream_id);
    }

    fn on_closed(&self) {
        fire(&self.closed, ());
    }
}

struct Signals {
    ready: oneshot::Receiver<Result<()>>,
    created: oneshot::Receiver<u32>,
    closed: oneshot::Receiver<()>,
}

/// Records broadcasters over RTMP, one session per `record` call
pub struct RecordingOrchestrator {
    config: RecorderConfig,
    dialer: Arc<dyn RtmpDialer>,
    evaluator: Arc<dyn ScriptEvaluator>,
}

impl RecordingOrchestrator {
    pub fn new(
        config: RecorderConfig,
        dialer: Arc<dyn RtmpDialer>,
        evaluator: Arc<dyn ScriptEvaluator>,
    ) -> Self {
        Self {
            config,
            dialer,
            evaluator,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Record `target` until the relay hangs up or media stops flowing
    ///
    /// Sessions ending in `Success` or `NoData` return their report; any other
    /// failure is returned as the error that ended the session.
    pub async fn record(
        &self,
        target: &RtmpTarget,
        token: &str,
        sink: Option<Box<dyn MediaSink>>,
    ) -> Result<RecordingReport> {
        let mut session = RecordingSession::new();

        let (ready_tx, ready) = oneshot::channel();
        let (created_tx, created) = oneshot::channel();
        let (closed_tx, closed) = oneshot::channel();
        let handler = Arc::new(SessionHandler {
            solver: ChallengeSolver::new(self.evaluator.clone(), self.config.placeholders.clone()),
            counters: session.counters().clone(),
            sink: StdMutex::new(sink),
            ready: StdMutex::new(Some(ready_tx)),
            created: StdMutex::new(Some(created_tx)),
            closed: StdMutex::new(Some(closed_tx)),
        });
        let signals = Signals {
            ready,
            created,
            closed,
        };

        tracing::info!(
            url = %target.url,
            playpath = %target.playpath,
            model_id = target.model_id,
            "Connecting to relay"
        );

        let result = match self
            .dialer
            .dial(&target.url, handler.clone(), self.config.chunk_size)
            .await
        {
            Ok(mut conn) => {
                let result = self
                    .drive(conn.as_mut(), &mut session, target, token, signals)
                    .await;
                conn.close().await;
                result
            }
            Err(e) => Err(e),
        };

        if let Some(mut sink) = handler.take_sink() {
            if let Err(e) = sink.finish() {
                tracing::warn!(error = %e, "Failed to finish output");
            }
        }

        let report = session.finish(&result);
        tracing::info!(
            outcome = ?report.outcome,
            bytes = report.bytes_received,
            video = report.video_messages,
            audio = report.audio_messages,
            duration_secs = report.duration.as_secs(),
            "Recording session ended"
        );

        match result {
            Ok(()) => Ok(report),
            Err(_) if report.outcome == Outcome::NoData => Ok(report),
            Err(e) => Err(e),
        }
    }

    async fn drive(
        &self,
        conn: &mut dyn RtmpConnection,
        session: &mut RecordingSession,
        target: &RtmpTarget,
        token: &str,
        signals: Signals,
    ) -> Result<()> {
        let Signals {
            ready,
            created,
            mut closed,
        } = signals;

        let params = ConnectParams {
            token: token.to_string(),
            suffix: String::new(),
            room_id: target.room_id.to_string(),
            op_type: self.config.op_type.clone(),
            model_id: target.model_id,
            flags: 0,
            extra: String::new(),
        };
        session.await_challenge();
        conn.connect(&params).await?;

        tokio::select! {
            answered = timeout(self.config.challenge_timeout, ready) => match answered {
                Err(_) => return Err(Error::ChallengeTimeout),
                Ok(Err(_)) => return Err(Error::Closed),
                Ok(Ok(answered)) => answered?,
            },
            _ = &mut closed => return Err(Error::Closed),
        }
        tracing::debug!(phase = %session.phase(), "Login challenge answered");

        session.await_stream();
        conn.create_stream().await?;

        let stream_id = tokio::select! {
            created = timeout(self.config.stream_timeout, created) => match created {
                Err(_) => return Err(Error::StreamCreateTimeout),
                Ok(Err(_)) => return Err(Error::Closed),
                Ok(Ok(stream_id)) => stream_id,
            },
            _ = &mut closed => return Err(Error::Closed),
        };

        conn.play(stream_id, &PlayParams::new(target.playpath.as_str()))
            .await?;
        session.start_playing();
        tracing::info!(stream_id, playpath = %target.playpath, "Recording started");

        let report_period = self.config.report_interval.max(MIN_PERIOD);
        let sample_period = self.config.sample_interval.max(MIN_PERIOD);
        let start = Instant::now();
        let mut report = interval_at(start + report_period, report_period);
        let mut sample = interval_at(start + sample_period, sample_period);
        let log_every = self.config.report_log_every.max(1);
        let mut ticks: u32 = 0;

        loop {
            tokio::select! {
                _ = &mut closed => {
                    tracing::info!("Relay closed the stream");
                    return Ok(());
                }
                _ = report.tick() => {
                    ticks = ticks.wrapping_add(1);
                    let counters = session.counters();
                    if ticks % log_every == 0 {
                        tracing::info!(megabytes = %format!("{:.2}", counters.megabytes()), "Recording");
                    } else {
                        tracing::debug!(bytes = counters.bytes(), "Recording");
                    }
                }
                _ = sample.tick() => {
                    if !session.sample() {
                        tracing::warn!(bytes = session.counters().bytes(), "No media since last sample");
                        return Err(Error::NoDataTimeout);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::challenge::tests::{challenge_message, EchoEvaluator};
    use crate::protocol::constants::{CSID_COMMAND, MSG_AUDIO, MSG_VIDEO};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Debug, Clone, Default)]
    struct Script {
        refuse: bool,
        hang_up_on_connect: bool,
        answer_challenge: bool,
        create_stream: bool,
        media_messages: u32,
        close_after_media: bool,
    }

    impl Script {
        fn cooperative(media_messages: u32) -> Self {
            Self {
                answer_challenge: true,
                create_stream: true,
                media_messages,
                close_after_media: true,
                ..Default::default()
            }
        }
    }

    #[derive(Default)]
    struct Log {
        calls: StdMutex<Vec<String>>,
        outgoing: StdMutex<Vec<RtmpMessage>>,
    }

    impl Log {
        fn call(&self, name: impl Into<String>) {
            self.calls.lock().unwrap().push(name.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct FakeDialer {
        script: Script,
        log: Arc<Log>,
    }

    #[async_trait]
    impl RtmpDialer for FakeDialer {
        async fn dial(
            &self,
            url: &str,
            handler: Arc<dyn RtmpHandler>,
            chunk_size: u32,
        ) -> Result<Box<dyn RtmpConnection>> {
            assert_eq!(chunk_size, 100);
            if self.script.refuse {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    url.to_string(),
                )));
            }
            let (sender, outgoing) = RtmpSender::channel();
            Ok(Box::new(FakeConnection {
                script: self.script.clone(),
                log: self.log.clone(),
                handler,
                sender,
                outgoing,
            }))
        }
    }

    struct FakeConnection {
        script: Script,
        log: Arc<Log>,
        handler: Arc<dyn RtmpHandler>,
        sender: RtmpSender,
        outgoing: UnboundedReceiver<RtmpMessage>,
    }

    #[async_trait]
    impl RtmpConnection for FakeConnection {
        async fn connect(&mut self, params: &ConnectParams) -> Result<()> {
            self.log.call(format!("connect:{}:{}", params.token, params.room_id));
            if self.script.hang_up_on_connect {
                self.handler.on_closed();
            } else if self.script.answer_challenge {
                let challenge = challenge_message(7.0, "(function(){return window.innerWidth})()");
                self.handler.on_received(&self.sender, &challenge);
            }
            Ok(())
        }

        async fn create_stream(&mut self) -> Result<()> {
            self.log.call("create_stream");
            if self.script.create_stream {
                self.handler.on_stream_created(1);
            }
            Ok(())
        }

        async fn play(&mut self, stream_id: u32, params: &PlayParams) -> Result<()> {
            self.log.call(format!("play:{}:{}", stream_id, params.path));

            let handler = self.handler.clone();
            let sender = self.sender.clone();
            let script = self.script.clone();
            tokio::spawn(async move {
                for i in 0..script.media_messages {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    let type_id = if i % 2 == 0 { MSG_VIDEO } else { MSG_AUDIO };
                    let msg = RtmpMessage::new(
                        6,
                        type_id,
                        1,
                        i * 1000,
                        Bytes::from_static(&[0x17, 0, 0, 0, 0]),
                    );
                    handler.on_received(&sender, &msg);
                }
                if script.close_after_media {
                    handler.on_closed();
                }
            });
            Ok(())
        }

        async fn send(&mut self, msg: RtmpMessage) -> Result<()> {
            self.sender.send(msg)
        }

        async fn close(&mut self) {
            self.log.call("close");
            while let Ok(msg) = self.outgoing.try_recv() {
                self.log.outgoing.lock().unwrap().push(msg);
            }
        }
    }

    #[derive(Default)]
    struct SinkLog {
        video: usize,
        audio: usize,
        finished: usize,
    }

    struct FakeSink(Arc<StdMutex<SinkLog>>);

    impl MediaSink for FakeSink {
        fn write_video_tag(&mut self, _data: Bytes, _timestamp: u32) -> Result<()> {
            self.0.lock().unwrap().video += 1;
            Ok(())
        }

        fn write_audio_tag(&mut self, _data: Bytes, _timestamp: u32) -> Result<()> {
            self.0.lock().unwrap().audio += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.0.lock().unwrap().finished += 1;
            Ok(())
        }
    }

    fn target() -> RtmpTarget {
        RtmpTarget {
            url: "rtmp://video712.myfreecams.com:1935/NxServer".into(),
            playpath: "mp4:mfc_100000042.f4v".into(),
            session_id: 9,
            model_id: 42,
            room_id: 100_000_042,
        }
    }

    fn orchestrator(script: Script) -> (RecordingOrchestrator, Arc<Log>) {
        orchestrator_with(RecorderConfig::default(), script)
    }

    fn orchestrator_with(
        config: RecorderConfig,
        script: Script,
    ) -> (RecordingOrchestrator, Arc<Log>) {
        let log = Arc::new(Log::default());
        let dialer = Arc::new(FakeDialer {
            script,
            log: log.clone(),
        });
        let orchestrator = RecordingOrchestrator::new(config, dialer, Arc::new(EchoEvaluator));
        (orchestrator, log)
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_until_peer_close() {
        let (orchestrator, log) = orchestrator(Script::cooperative(6));
        let sink_log = Arc::new(StdMutex::new(SinkLog::default()));
        let sink = Box::new(FakeSink(sink_log.clone()));

        let report = orchestrator
            .record(&target(), "tok", Some(sink))
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.bytes_received, 30);
        assert_eq!(report.video_messages, 3);
        assert_eq!(report.audio_messages, 3);
        assert!(report.last_received.is_some());

        assert_eq!(
            log.calls(),
            vec![
                "connect:tok:100000042".to_string(),
                "create_stream".to_string(),
                "play:1:mp4:mfc_100000042.f4v".to_string(),
                "close".to_string(),
            ]
        );

        // The challenge answer went out on the command stream
        let outgoing = log.outgoing.lock().unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].csid, CSID_COMMAND);
        let values = outgoing[0].command_values().unwrap();
        assert_eq!(values[0].as_str(), Some("_result"));
        assert_eq!(values[1].as_number(), Some(7.0));
        assert_eq!(values[3].as_str(), Some("(function(){return 1})()"));

        let sink_log = sink_log.lock().unwrap();
        assert_eq!((sink_log.video, sink_log.audio), (3, 3));
        assert_eq!(sink_log.finished, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_timeout() {
        let (orchestrator, log) = orchestrator(Script {
            create_stream: true,
            ..Default::default()
        });
        let started = Instant::now();

        let result = orchestrator.record(&target(), "tok", None).await;

        assert!(matches!(result, Err(Error::ChallengeTimeout)));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(log.calls().last().map(String::as_str), Some("close"));
        assert_eq!(log.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_create_timeout() {
        let (orchestrator, log) = orchestrator(Script {
            answer_challenge: true,
            ..Default::default()
        });

        let result = orchestrator.record(&target(), "tok", None).await;

        assert!(matches!(result, Err(Error::StreamCreateTimeout)));
        let calls = log.calls();
        assert_eq!(calls[1], "create_stream");
        assert_eq!(calls.iter().filter(|c| *c == "close").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_ends_session() {
        let (orchestrator, log) = orchestrator(Script {
            answer_challenge: true,
            create_stream: true,
            media_messages: 45,
            close_after_media: false,
            ..Default::default()
        });
        let sink_log = Arc::new(StdMutex::new(SinkLog::default()));
        let started = Instant::now();

        let report = orchestrator
            .record(&target(), "tok", Some(Box::new(FakeSink(sink_log.clone()))))
            .await
            .unwrap();

        // Samples at 30 s and 60 s see growth, the one at 90 s does not
        assert_eq!(report.outcome, Outcome::NoData);
        assert_eq!(report.bytes_received, 45 * 5);
        assert!(started.elapsed() >= Duration::from_secs(90));
        assert!(started.elapsed() < Duration::from_secs(120));
        assert_eq!(log.calls().iter().filter(|c| *c == "close").count(), 1);
        assert_eq!(sink_log.lock().unwrap().finished, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_fails_first_sample() {
        let (orchestrator, _log) = orchestrator(Script {
            answer_challenge: true,
            create_stream: true,
            ..Default::default()
        });
        let started = Instant::now();

        let report = orchestrator.record(&target(), "tok", None).await.unwrap();

        assert_eq!(report.outcome, Outcome::NoData);
        assert_eq!(report.bytes_received, 0);
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_periods_do_not_panic() {
        let config = RecorderConfig {
            report_interval: Duration::ZERO,
            sample_interval: Duration::ZERO,
            ..RecorderConfig::default()
        };
        let (orchestrator, log) = orchestrator_with(
            config,
            Script {
                answer_challenge: true,
                create_stream: true,
                ..Default::default()
            },
        );
        let started = Instant::now();

        let report = orchestrator.record(&target(), "tok", None).await.unwrap();

        assert_eq!(report.outcome, Outcome::NoData);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(log.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_before_ready() {
        let (orchestrator, log) = orchestrator(Script {
            hang_up_on_connect: true,
            ..Default::default()
        });

        let result = orchestrator.record(&target(), "tok", None).await;

        assert!(matches!(result, Err(Error::Closed)));
        assert_eq!(log.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_dial_failure_still_finishes_sink() {
        let (orchestrator, log) = orchestrator(Script {
            refuse: true,
            ..Default::default()
        });
        let sink_log = Arc::new(StdMutex::new(SinkLog::default()));

        let result = orchestrator
            .record(&target(), "tok", Some(Box::new(FakeSink(sink_log.clone()))))
            .await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(log.calls().is_empty());
        assert_eq!(sink_log.lock().unwrap().finished, 1);
    }
}
