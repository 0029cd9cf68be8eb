//! Session state machine and orchestration.
//!
//! The controller is a single-owner actor: its `run` loop is the only place
//! that touches session state. Captured frames, remote messages and playback
//! completions all arrive as queued inputs and are handled one at a time, so
//! the playback watermark and the live-segment set never see concurrent
//! mutation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::audio::pcm_codec::decode_base64_segment;
use crate::audio::{
    AudioBackend, AudioCaptureEngine, CHANNELS, EncodedFrame, FrameSource, INPUT_MIME_TYPE,
    OUTPUT_SAMPLE_RATE, PlaybackEvent, PlaybackScheduler,
};
use crate::config::Config;
use crate::error::SessionError;
use crate::events::{
    ConnectionStatus, SessionEvent, Speaker, TranscriptFragment, UserCommand, VolumeLevels,
};
use crate::net_link::{ChannelHandle, Connector, NetCommand, NetEvent};
use crate::protocol::{InboundMessage, OutboundMessage};

/// Output level reported while agent audio is arriving or playing.
pub const AGENT_SPEAKING_PULSE: f32 = 0.5;

// 采集线程与会话之间的帧队列，约 2 秒音频
const FRAME_QUEUE: usize = 8;

/// One live conversation. Created once the remote channel is open, dropped on
/// disconnect or error, never reused.
struct Session {
    id: Uuid,
    commands: mpsc::Sender<NetCommand>,
    net_events: mpsc::Receiver<NetEvent>,
    capture: Option<AudioCaptureEngine>,
    frame_tx: Option<mpsc::Sender<EncodedFrame>>,
    frames: mpsc::Receiver<EncodedFrame>,
    playback: PlaybackScheduler,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
}

enum SessionInput {
    Net(NetEvent),
    Frame(EncodedFrame),
    /// The capture thread exited on its own; the microphone is gone.
    CaptureEnded,
    Playback(PlaybackEvent),
}

impl Session {
    fn new(
        channel: ChannelHandle,
        playback: PlaybackScheduler,
        playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) -> Self {
        let (frame_tx, frames) = mpsc::channel(FRAME_QUEUE);
        Self {
            id: Uuid::new_v4(),
            commands: channel.commands,
            net_events: channel.events,
            capture: None,
            frame_tx: Some(frame_tx),
            frames,
            playback,
            playback_events,
        }
    }

    fn start_capture(&mut self, source: Box<dyn FrameSource>) -> Result<(), SessionError> {
        let Some(tx) = self.frame_tx.take() else {
            return Ok(());
        };
        let engine = AudioCaptureEngine::start(source, tx)
            .map_err(|e| SessionError::Permission(format!("Failed to start capture: {:#}", e)))?;
        self.capture = Some(engine);
        Ok(())
    }

    async fn next_input(&mut self) -> SessionInput {
        tokio::select! {
            biased;
            event = self.net_events.recv() => {
                SessionInput::Net(event.unwrap_or(NetEvent::Closed(None)))
            }
            Some(event) = self.playback_events.recv() => SessionInput::Playback(event),
            frame = self.frames.recv(), if self.capture.is_some() => match frame {
                Some(frame) => SessionInput::Frame(frame),
                None => SessionInput::CaptureEnded,
            },
        }
    }

    /// Ask the remote side to close and wait for its acknowledgement, at most
    /// `timeout`. Inbound messages that race with the close are discarded.
    async fn close_channel(&mut self, timeout: Duration) {
        let ack = async {
            if let Err(e) = self.commands.send(NetCommand::Close).await {
                log::warn!("[{}] Error closing session: {}", self.id, e);
                return;
            }
            loop {
                match self.net_events.recv().await {
                    Some(NetEvent::Closed(_)) | None => break,
                    Some(NetEvent::Error(e)) => {
                        log::warn!("[{}] Error closing session: {}", self.id, e);
                        break;
                    }
                    Some(NetEvent::Message(_)) => {}
                }
            }
        };
        if tokio::time::timeout(timeout, ack).await.is_err() {
            log::warn!("[{}] Remote close not acknowledged within {:?}", self.id, timeout);
        }
    }

    /// Stop capture, flush playback and release both devices. Idempotent.
    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.frame_tx = None;
        self.playback.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

/// Release on the blocking pool: stopping capture and output joins their
/// device threads, which can take up to one capture frame.
async fn release_session(session: Session) {
    let id = session.id;
    if let Err(e) = tokio::task::spawn_blocking(move || drop(session)).await {
        log::error!("[{}] Device release panicked: {}", id, e);
    }
}

// 顺序：麦克风，输出设备，远端通道
async fn open_session(
    backend: &dyn AudioBackend,
    connector: &dyn Connector,
) -> Result<(Session, Box<dyn FrameSource>), SessionError> {
    let source = backend.open_capture()?;
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let output = backend.open_output(playback_tx)?;
    let playback = PlaybackScheduler::new(output);
    let channel = connector.connect().await?;
    Ok((Session::new(channel, playback, playback_rx), source))
}

async fn next_input(session: Option<&mut Session>) -> SessionInput {
    match session {
        Some(session) => session.next_input().await,
        None => std::future::pending().await,
    }
}

pub struct SessionController {
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn AudioBackend>,
    events: mpsc::Sender<SessionEvent>,
    status: ConnectionStatus,
    levels: VolumeLevels,
    session: Option<Session>,
}

impl SessionController {
    pub fn new(
        config: Arc<Config>,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn AudioBackend>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            connector,
            backend,
            events,
            status: ConnectionStatus::Disconnected,
            levels: VolumeLevels::default(),
            session: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Drive the controller until `Shutdown` arrives or every command sender
    /// is dropped. The active session is always disconnected on the way out.
    pub async fn run(mut self, mut commands: mpsc::Receiver<UserCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    let cmd = match cmd {
                        Some(UserCommand::Toggle) => match self.status {
                            ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                                UserCommand::Disconnect
                            }
                            _ => UserCommand::Connect,
                        },
                        Some(cmd) => cmd,
                        None => UserCommand::Shutdown,
                    };
                    match cmd {
                        UserCommand::Connect => {
                            let interrupted = {
                                let connect = self.connect();
                                tokio::pin!(connect);
                                loop {
                                    tokio::select! {
                                        _ = &mut connect => break None,
                                        cmd = commands.recv() => match cmd {
                                            Some(UserCommand::Connect) => {
                                                log::debug!("Already connecting, ignoring connect")
                                            }
                                            other => break Some(other),
                                        },
                                    }
                                }
                            };
                            // any other command cancels a connect still in progress
                            match interrupted {
                                None => {}
                                Some(None | Some(UserCommand::Shutdown)) => {
                                    log::info!("Connect cancelled by shutdown");
                                    self.disconnect().await;
                                    break;
                                }
                                Some(Some(_)) => {
                                    log::info!("Connect cancelled");
                                    self.disconnect().await;
                                }
                            }
                        }
                        UserCommand::Disconnect => self.disconnect().await,
                        UserCommand::Shutdown => {
                            self.disconnect().await;
                            break;
                        }
                        UserCommand::Toggle => {}
                    }
                }
                input = next_input(self.session.as_mut()) => self.handle_input(input).await,
            }
        }
        log::info!("Session controller stopped");
    }

    /// Open devices and the remote channel, then start streaming.
    ///
    /// A no-op while CONNECTING or CONNECTED. Any failure ends in ERROR with
    /// everything acquired so far released.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            log::warn!("Connect requested while {:?}, ignoring", self.status);
            return Ok(());
        }

        self.set_status(ConnectionStatus::Connecting).await;
        self.levels = VolumeLevels::default();

        let opened = open_session(self.backend.as_ref(), self.connector.as_ref()).await;
        let (mut session, source) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                log::error!("Connection failed: {}", e);
                self.set_status(ConnectionStatus::Error).await;
                return Err(e);
            }
        };

        log::info!("[{}] Session connected", session.id);
        self.set_status(ConnectionStatus::Connected).await;

        // 通道确认之后才开始采集
        if let Err(e) = session.start_capture(source) {
            log::error!("[{}] {}", session.id, e);
            release_session(session).await;
            self.set_status(ConnectionStatus::Error).await;
            return Err(e);
        }
        self.session = Some(session);
        Ok(())
    }

    /// Best-effort remote close followed by unconditional local release.
    /// A no-op when there is no session to tear down.
    pub async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            // cancelled connect: whatever it acquired is already dropped
            if matches!(
                self.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            ) {
                self.reset_output_level();
                self.set_status(ConnectionStatus::Disconnected).await;
            }
            return;
        };

        log::info!("[{}] Disconnecting", session.id);
        session.close_channel(self.config.close_timeout).await;
        release_session(session).await;

        self.reset_output_level();
        self.set_status(ConnectionStatus::Disconnected).await;
    }

    async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Net(event) => self.handle_net_event(event).await,
            SessionInput::Frame(frame) => self.handle_frame(frame),
            SessionInput::CaptureEnded => {
                log::error!("Microphone capture stopped unexpectedly");
                self.teardown(ConnectionStatus::Error).await;
            }
            SessionInput::Playback(event) => self.handle_playback_event(event),
        }
    }

    async fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Message(msg) => self.handle_message(msg).await,
            NetEvent::Closed(reason) => {
                log::info!("Remote closed the session: {:?}", reason);
                self.teardown(ConnectionStatus::Disconnected).await;
            }
            NetEvent::Error(e) => {
                log::error!("Session error: {}", e);
                self.teardown(ConnectionStatus::Error).await;
            }
        }
    }

    /// Release after the remote side is already gone.
    async fn teardown(&mut self, status: ConnectionStatus) {
        if let Some(session) = self.session.take() {
            release_session(session).await;
        }
        self.reset_output_level();
        self.set_status(status).await;
    }

    async fn handle_message(&mut self, msg: InboundMessage) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // 1. agent audio
        if let Some(chunk) = &msg.audio_chunk {
            // coarse presence pulse, not a measured level
            self.levels.output = AGENT_SPEAKING_PULSE;
            emit_volume(&self.events, self.levels);

            match decode_base64_segment(chunk, OUTPUT_SAMPLE_RATE, CHANNELS) {
                Ok(segment) => {
                    session.playback.schedule(segment);
                }
                Err(e) => log::warn!("[{}] Dropping audio chunk: {}", session.id, e),
            }
        }

        // 2. barge-in
        if msg.interrupted {
            let stopped = session.playback.flush();
            log::info!("[{}] Interrupted, stopped {} segments", session.id, stopped);
            self.reset_output_level();
        }

        // 3. transcription
        if let Some(text) = msg.output_transcript {
            self.emit_transcript(text, Speaker::Agent, false).await;
        }
        if let Some(text) = msg.input_transcript {
            self.emit_transcript(text, Speaker::User, false).await;
        }

        // 4. end of turn
        if msg.turn_complete {
            self.emit_transcript(String::new(), Speaker::Agent, true).await;
        }
    }

    fn handle_frame(&mut self, frame: EncodedFrame) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let message = OutboundMessage::Media {
            data: frame.payload,
            mime_type: INPUT_MIME_TYPE.to_string(),
        };
        match session.commands.try_send(NetCommand::Send(message)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("[{}] Send queue full, dropping frame {}", session.id, frame.seq)
            }
            // the link is gone; its Closed/Error event drives the teardown
            Err(TrySendError::Closed(_)) => {
                log::debug!("[{}] Channel closed, dropping frame {}", session.id, frame.seq)
            }
        }

        self.levels.input = frame.rms.clamp(0.0, 1.0);
        emit_volume(&self.events, self.levels);
    }

    fn handle_playback_event(&mut self, event: PlaybackEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let PlaybackEvent::Ended(id) = event;
        if session.playback.on_segment_ended(id) {
            log::debug!("[{}] Playback idle", session.id);
            self.reset_output_level();
        }
    }

    fn reset_output_level(&mut self) {
        if self.levels.output != 0.0 {
            self.levels.output = 0.0;
            emit_volume(&self.events, self.levels);
        }
    }

    async fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        log::info!("Status {:?} -> {:?}", self.status, status);
        self.status = status;
        if self.events.send(SessionEvent::Status { status }).await.is_err() {
            log::debug!("Event receiver dropped");
        }
    }

    async fn emit_transcript(&mut self, text: String, sender: Speaker, is_complete: bool) {
        let fragment = TranscriptFragment {
            text,
            sender,
            is_complete,
        };
        if self
            .events
            .send(SessionEvent::Transcription(fragment))
            .await
            .is_err()
        {
            log::debug!("Event receiver dropped");
        }
    }
}

// 音量事件可以丢，不阻塞会话循环
fn emit_volume(events: &mpsc::Sender<SessionEvent>, levels: VolumeLevels) {
    if let Err(TrySendError::Full(_)) = events.try_send(SessionEvent::Volume(levels)) {
        log::trace!("UI queue full, volume update dropped");
    }
}
