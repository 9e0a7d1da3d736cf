//! Session controller: connect, negotiate a grammar, recognize, forward.
//!
//! ## Flow
//!
//! ```text
//! connect ─► [identify] ─► requestGrammar ─► grammar ─► load ─► Ready(Command)
//!                                                                   │
//!   engine thread / input lines ─► results queue ─┐                 │
//!   reader task ─► inbound queue ─────────────────┼─► select! loop ─┘
//!   shutdown future ──────────────────────────────┘        │
//!                                                outbound queue ─► writer task ─► server
//! ```
//!
//! The loop is the only owner of the mode flag, the stored command grammar
//! and the adapter, so results are handled one at a time in arrival order.

pub mod mode;
pub mod pump;
pub mod status;

pub use mode::{Mode, ModeController, ModePolicy};
pub use status::{SessionState, SessionStats, SessionStatusEvent, StatsSnapshot};

use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SonogramError};
use crate::protocol::{
    self, Format, IdentificationMessage, Message, RecognitionMessage, RequestGrammarMessage, Role,
};
use crate::recognition::{
    CommandGrammar, EngineHandle, RecognitionAdapter, RecognitionResult, ResultSink,
};
use crate::transport::{self, Channel, Endpoint, RetryPolicy};

/// Broadcast capacity for status events.
const STATUS_CAP: usize = 64;

/// Lines buffered between the input thread and the session loop.
const LINE_QUEUE: usize = 16;
/// How long a failing session waits for queued frames and the close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Port used when nothing else is configured.
pub const DEFAULT_PORT: u16 = 9001;

/// Configuration for a `Session`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server to connect to. Default: `ws://localhost:9001/`.
    pub endpoint: Endpoint,
    /// Language id sent in `requestGrammar`. Default: `"default"`.
    pub lang: String,
    /// Send `identify{role:"recognizer"}` before requesting the grammar.
    /// Default: off.
    pub identify: bool,
    /// Outbound JSON layout. `Pretty` is meant for debugging only.
    pub format: Format,
    /// How long to wait for the grammar reply. Default: 10 s.
    pub grammar_timeout: Duration,
    /// Connection attempts. Default: a single attempt.
    pub connect_retry: RetryPolicy,
    /// Mode switching triggers.
    pub mode_policy: ModePolicy,
    /// Messages buffered between the loop and the writer task. Default: 64.
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::websocket("localhost", DEFAULT_PORT, false),
            lang: "default".into(),
            identify: false,
            format: Format::Compact,
            grammar_timeout: Duration::from_secs(10),
            connect_retry: RetryPolicy::default(),
            mode_policy: ModePolicy::default(),
            outbound_capacity: 64,
        }
    }
}

/// Where utterances come from.
pub enum UtteranceSource {
    /// The engine streams live audio and delivers results itself.
    Live,
    /// One utterance per line, recognized with `recognize_once`.
    /// End of input ends the session cleanly.
    Lines(LineFeed),
}

/// Line-by-line utterance input.
pub enum LineFeed {
    /// Async reader polled by the session loop.
    Reader(Lines<Box<dyn AsyncBufRead + Unpin + Send>>),
    /// Lines read on a detached thread, so a read that never returns cannot
    /// hold up runtime shutdown.
    Thread(mpsc::Receiver<std::io::Result<String>>),
}

impl LineFeed {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        match self {
            LineFeed::Reader(lines) => lines.next_line().await,
            LineFeed::Thread(rx) => rx.recv().await.transpose(),
        }
    }
}

impl UtteranceSource {
    pub fn lines<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let reader: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(BufReader::new(reader));
        UtteranceSource::Lines(LineFeed::Reader(reader.lines()))
    }

    /// Read lines from a blocking reader on a dedicated thread.
    ///
    /// # Errors
    /// The I/O error if the thread cannot be spawned.
    pub fn blocking_lines<R>(reader: R) -> std::io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_QUEUE);
        std::thread::Builder::new()
            .name("sonogram-input".into())
            .spawn(move || {
                for line in reader.lines() {
                    let failed = line.is_err();
                    if tx.blocking_send(line).is_err() || failed {
                        break;
                    }
                }
            })?;
        Ok(UtteranceSource::Lines(LineFeed::Thread(rx)))
    }

    /// Standard input, one utterance per line.
    ///
    /// # Errors
    /// See [`UtteranceSource::blocking_lines`].
    pub fn stdin() -> std::io::Result<Self> {
        Self::blocking_lines(std::io::BufReader::new(std::io::stdin()))
    }
}

impl std::fmt::Debug for UtteranceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UtteranceSource::Live => f.write_str("Live"),
            UtteranceSource::Lines(_) => f.write_str("Lines(..)"),
        }
    }
}

/// One client session against one server.
pub struct Session {
    config: SessionConfig,
    adapter: RecognitionAdapter,
    status: Arc<Mutex<SessionState>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    stats: Arc<SessionStats>,
}

impl Session {
    pub fn new(config: SessionConfig, engine: EngineHandle) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CAP);
        Self {
            config,
            adapter: RecognitionAdapter::new(engine),
            status: Arc::new(Mutex::new(SessionState::Disconnected)),
            status_tx,
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state (snapshot).
    pub fn state(&self) -> SessionState {
        *self.status.lock()
    }

    /// Subscribe to state changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Whether `UtteranceSource::Live` can be used with this session's engine.
    pub fn supports_streaming(&self) -> bool {
        self.adapter.supports_streaming()
    }

    /// Shared counters; stays readable after `run` consumes the session.
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    /// Open the channel using the configured retry policy.
    ///
    /// # Errors
    /// `SonogramError::Connect` once every attempt has failed. The session is
    /// then `Terminated` and nothing has been sent.
    pub async fn connect(&self) -> Result<Channel> {
        info!(endpoint = %self.config.endpoint, "connecting");
        match transport::connect_with_retry(&self.config.endpoint, &self.config.connect_retry).await
        {
            Ok(channel) => {
                self.set_state(SessionState::Connected, None);
                Ok(channel)
            }
            Err(e) => {
                error!("{e}");
                self.set_state(SessionState::Terminated, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Run the handshake on a freshly connected channel and return the
    /// command grammar the server sent.
    ///
    /// # Errors
    /// - `ReceiveTimeout` if no reply arrives within `grammar_timeout`.
    /// - `UnexpectedMessage` if the reply is anything but `grammar`.
    /// - `Decode`, `Send`, `Receive`, `ChannelClosed` from the channel.
    pub async fn negotiate_grammar(&self, channel: &mut Channel) -> Result<Arc<CommandGrammar>> {
        self.set_state(SessionState::AwaitingGrammar, None);

        if self.config.identify {
            self.send_direct(
                channel,
                IdentificationMessage {
                    role: Role::Recognizer,
                }
                .into(),
            )
            .await?;
        }
        self.send_direct(
            channel,
            RequestGrammarMessage {
                lang: self.config.lang.clone(),
            }
            .into(),
        )
        .await?;

        let frame = channel
            .receive_message(Some(self.config.grammar_timeout))
            .await?;
        match protocol::decode(&frame)? {
            Message::Grammar(reply) => {
                info!(
                    lang = %self.config.lang,
                    bytes = reply.grammar.len(),
                    "grammar received"
                );
                Ok(Arc::new(CommandGrammar::new(
                    self.config.lang.clone(),
                    reply.grammar,
                )))
            }
            other => Err(SonogramError::UnexpectedMessage {
                expected: "grammar",
                actual: other.action().to_string(),
            }),
        }
    }

    /// Drive the whole session until `shutdown` resolves, input ends, or a
    /// fatal error occurs. Grammars are released and the state is
    /// `Terminated` when this returns, whatever the outcome.
    pub async fn run<F>(mut self, input: UtteranceSource, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let outcome = self.drive(input, shutdown).await;
        self.adapter.release();

        match &outcome {
            Ok(()) => info!("session finished"),
            Err(e) => error!("session failed: {e}"),
        }
        let detail = outcome.as_ref().err().map(ToString::to_string);
        self.set_state(SessionState::Terminated, detail);
        outcome
    }

    async fn drive<F>(&mut self, input: UtteranceSource, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut channel = self.connect().await?;
        let grammar = match self.negotiate_grammar(&mut channel).await {
            Ok(grammar) => grammar,
            Err(e) => {
                close_quietly(&mut channel).await;
                return Err(e);
            }
        };
        if let Err(e) = self.adapter.load_grammar(Arc::clone(&grammar)) {
            close_quietly(&mut channel).await;
            return Err(e);
        }

        let mut modes = ModeController::new(grammar, self.config.mode_policy.clone());
        self.set_state(SessionState::Ready(Mode::Command), None);

        let (sink, source) = channel.split();
        let (outbound, mut writer) =
            pump::spawn_writer(sink, self.config.format, self.config.outbound_capacity);
        let (mut inbound, reader) = pump::spawn_reader(source, self.config.outbound_capacity);
        let (result_sink, mut results) = ResultSink::channel();

        let mut lines = match input {
            UtteranceSource::Live => {
                if let Err(e) = self.adapter.start_streaming(result_sink.clone()) {
                    reader.abort();
                    drop(outbound);
                    drain_writer(&mut writer).await;
                    return Err(e);
                }
                None
            }
            UtteranceSource::Lines(lines) => {
                info!("reading utterances from input, one per line");
                Some(lines)
            }
        };

        tokio::pin!(shutdown);

        let mut writer_done = false;
        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                Some(result) = results.recv() => {
                    if let Err(e) = self.handle_result(result, &mut modes, &outbound).await {
                        break Err(e);
                    }
                }
                line = next_line(&mut lines) => match line {
                    Ok(Some(line)) => {
                        if let Err(e) = self.handle_line(&line, &mut modes, &outbound).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => {
                        info!("end of input");
                        break Ok(());
                    }
                    Err(e) => break Err(e.into()),
                },
                message = inbound.recv() => match message {
                    Some(Ok(message)) => self.handle_inbound(message, &mut modes),
                    Some(Err(e)) if e.is_recoverable() => {
                        SessionStats::bump(&self.stats.inbound_dropped);
                        warn!("dropping inbound message: {e}");
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Err(SonogramError::ChannelClosed),
                },
                joined = &mut writer => {
                    writer_done = true;
                    break Err(writer_stopped(joined));
                }
            }
        };

        self.adapter.stop_streaming();
        drop(result_sink);
        drop(outbound);
        reader.abort();

        match outcome {
            Ok(()) => match writer.await {
                Ok(Ok(sent)) => {
                    info!(sent, "channel closed");
                    Ok(())
                }
                joined => Err(writer_stopped(joined)),
            },
            Err(e) => {
                if !writer_done {
                    drain_writer(&mut writer).await;
                }
                Err(e)
            }
        }
    }

    async fn handle_line(
        &mut self,
        line: &str,
        modes: &mut ModeController,
        outbound: &pump::OutboundQueue,
    ) -> Result<()> {
        match self.adapter.recognize_once(line) {
            Ok(Some(result)) => self.handle_result(result, modes, outbound).await,
            Ok(None) => {
                debug!(utterance = %line.trim(), "not recognized");
                Ok(())
            }
            Err(e) => {
                warn!("recognition failed: {e}");
                Ok(())
            }
        }
    }

    /// Switch mode if the result asks for it, then forward its semantics.
    async fn handle_result(
        &mut self,
        result: RecognitionResult,
        modes: &mut ModeController,
        outbound: &pump::OutboundQueue,
    ) -> Result<()> {
        SessionStats::bump(&self.stats.results);
        info!(mode = ?modes.mode(), text = %result.text, "recognized");

        match modes.on_result(&result, &mut self.adapter) {
            Ok(Some(mode)) => {
                SessionStats::bump(&self.stats.mode_switches);
                info!(?mode, "mode switched");
                self.set_state(SessionState::Ready(mode), None);
            }
            Ok(None) => {}
            Err(e) => warn!("staying in {:?} mode: {e}", modes.mode()),
        }

        outbound
            .push(
                RecognitionMessage {
                    semantics: result.semantics,
                }
                .into(),
            )
            .await?;
        SessionStats::bump(&self.stats.messages_queued);
        Ok(())
    }

    fn handle_inbound(&mut self, message: Message, modes: &mut ModeController) {
        match message {
            Message::Grammar(update) => {
                let grammar = Arc::new(CommandGrammar::new(
                    self.config.lang.clone(),
                    update.grammar,
                ));
                let before = modes.mode();
                match modes.replace_command_grammar(grammar, &mut self.adapter) {
                    Ok(()) => {
                        SessionStats::bump(&self.stats.grammar_updates);
                        info!(mode = ?modes.mode(), "command grammar replaced by server");
                    }
                    Err(e) => warn!("grammar update: {e}"),
                }
                if modes.mode() != before {
                    SessionStats::bump(&self.stats.mode_switches);
                    self.set_state(SessionState::Ready(modes.mode()), None);
                }
            }
            other => {
                SessionStats::bump(&self.stats.inbound_dropped);
                warn!("ignoring unexpected `{}` message", other.action());
            }
        }
    }

    async fn send_direct(&self, channel: &mut Channel, message: Message) -> Result<()> {
        let frame = protocol::encode(&message, self.config.format)?;
        debug!(action = message.action(), "sending {frame}");
        channel.send(frame).await
    }

    fn set_state(&self, state: SessionState, detail: Option<String>) {
        *self.status.lock() = state;
        let _ = self.status_tx.send(SessionStatusEvent { state, detail });
    }
}

async fn next_line(lines: &mut Option<LineFeed>) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn close_quietly(channel: &mut Channel) {
    if let Err(e) = channel.close().await {
        debug!("close after failed handshake: {e}");
    }
}

/// Let the writer flush what is queued and close the sink, giving up after
/// [`CLOSE_GRACE`]. The outbound queue must already be dropped.
async fn drain_writer(writer: &mut JoinHandle<Result<u64>>) {
    match tokio::time::timeout(CLOSE_GRACE, &mut *writer).await {
        Ok(Ok(Ok(sent))) => debug!(sent, "channel closed after error"),
        Ok(Ok(Err(e))) => debug!("close after error: {e}"),
        Ok(Err(e)) => debug!("writer task failed: {e}"),
        Err(_) => {
            warn!("channel did not close within {CLOSE_GRACE:?}; dropping it");
            writer.abort();
        }
    }
}

fn writer_stopped(joined: std::result::Result<Result<u64>, tokio::task::JoinError>) -> SonogramError {
    match joined {
        Ok(Err(e)) => e,
        Ok(Ok(_)) => SonogramError::Send("writer stopped unexpectedly".into()),
        Err(e) => SonogramError::Other(anyhow::anyhow!("writer task failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::TextEngine;
    use crate::transport::lines::line_channel;

    const GRAMMAR: &str = "#JSGF V1.0; grammar t; public <c> = open {action} file {target};";

    fn session(identify: bool) -> Session {
        let config = SessionConfig {
            identify,
            grammar_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        };
        Session::new(config, EngineHandle::new(TextEngine::new()))
    }

    async fn read_line(server: &mut (impl AsyncBufRead + Unpin)) -> String {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[test]
    fn default_config_targets_localhost() {
        let config = SessionConfig::default();
        assert_eq!(config.endpoint.to_string(), "ws://localhost:9001/");
        assert_eq!(config.lang, "default");
        assert!(!config.identify);
        assert_eq!(config.grammar_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_retry.max_attempts, 1);
    }

    #[tokio::test]
    async fn handshake_sends_identify_then_request() {
        use tokio::io::AsyncWriteExt;

        let (client, server) = tokio::io::duplex(1024);
        let mut channel = line_channel("duplex", client);
        let session = session(true);
        let mut status = session.subscribe_status();

        let server_task = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut read = BufReader::new(read);
            let first = read_line(&mut read).await;
            let second = read_line(&mut read).await;
            let reply = format!(
                "{}\n",
                serde_json::json!({"action": "grammar", "grammar": GRAMMAR})
            );
            write.write_all(reply.as_bytes()).await.unwrap();
            (first, second)
        });

        let grammar = session.negotiate_grammar(&mut channel).await.unwrap();
        assert_eq!(grammar.text, GRAMMAR);
        assert_eq!(grammar.lang, "default");
        assert_eq!(session.state(), SessionState::AwaitingGrammar);
        assert_eq!(
            status.recv().await.unwrap().state,
            SessionState::AwaitingGrammar
        );

        let (first, second) = server_task.await.unwrap();
        assert_eq!(first, r#"{"action":"identify","role":"recognizer"}"#);
        assert_eq!(second, r#"{"action":"requestGrammar","lang":"default"}"#);
    }

    #[tokio::test]
    async fn handshake_rejects_non_grammar_reply() {
        use tokio::io::AsyncWriteExt;

        let (client, mut server) = tokio::io::duplex(1024);
        let mut channel = line_channel("duplex", client);
        server
            .write_all(b"{\"action\":\"recognition\",\"semantics\":\"x\"}\n")
            .await
            .unwrap();

        let err = session(false)
            .negotiate_grammar(&mut channel)
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                SonogramError::UnexpectedMessage {
                    expected: "grammar",
                    ref actual
                } if actual == "recognition"
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn handshake_times_out_without_reply() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut channel = line_channel("duplex", client);

        let err = session(false)
            .negotiate_grammar(&mut channel)
            .await
            .unwrap_err();
        assert!(matches!(err, SonogramError::ReceiveTimeout(_)), "{err}");
    }

    #[tokio::test]
    async fn malformed_reply_during_handshake_is_fatal() {
        use tokio::io::AsyncWriteExt;

        let (client, mut server) = tokio::io::duplex(1024);
        let mut channel = line_channel("duplex", client);
        server.write_all(b"{not json}\n").await.unwrap();

        let err = session(false)
            .negotiate_grammar(&mut channel)
            .await
            .unwrap_err();
        assert!(matches!(err, SonogramError::Decode(_)), "{err}");
    }

    /// Never returns from `read`, like a terminal nobody types into.
    struct SilentTerminal;

    impl std::io::Read for SilentTerminal {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    fn feed(source: UtteranceSource) -> LineFeed {
        match source {
            UtteranceSource::Lines(feed) => feed,
            UtteranceSource::Live => panic!("expected line input"),
        }
    }

    #[tokio::test]
    async fn blocking_lines_are_forwarded_then_end() {
        let reader = std::io::Cursor::new("open file\n\ninsert\n");
        let mut lines = feed(UtteranceSource::blocking_lines(reader).unwrap());

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("open file"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("insert"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[test]
    fn stuck_input_thread_does_not_hold_up_runtime_shutdown() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let mut lines = feed(
                    UtteranceSource::blocking_lines(std::io::BufReader::new(SilentTerminal))
                        .unwrap(),
                );
                let waited =
                    tokio::time::timeout(Duration::from_millis(50), lines.next_line()).await;
                assert!(waited.is_err(), "no line should arrive");
            });
            drop(runtime);
            let _ = done_tx.send(());
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("runtime shut down while the input thread was blocked");
    }
}
