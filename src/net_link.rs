use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use url::Url;

use crate::config::Config;
use crate::error::SessionError;
use crate::protocol::{InboundMessage, OutboundMessage, RealtimeInputMessage, ServerMessage, SetupMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub enum NetEvent {
    Message(InboundMessage),
    /// Remote closed the channel, with the close reason if one was given.
    Closed(Option<String>),
    Error(String),
}

#[derive(Debug)]
pub enum NetCommand {
    Send(OutboundMessage),
    Close,
}

// 命令队列的容量，满了之后逐帧丢弃
const COMMAND_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 100;

/// An open remote channel: commands go in, events come out.
/// Dropping it ends the link task and closes the socket.
#[derive(Debug)]
pub struct ChannelHandle {
    pub commands: mpsc::Sender<NetCommand>,
    pub events: mpsc::Receiver<NetEvent>,
}

/// Establishes a remote channel. Returning `Ok` means the remote side has
/// accepted the session and is ready for audio.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<ChannelHandle, SessionError>;
}

pub struct WsConnector {
    config: Arc<Config>,
}

impl WsConnector {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn endpoint(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.config.ws_url)?;
        if !self.config.api_key.is_empty() {
            url.query_pairs_mut().append_pair("key", &self.config.api_key);
        }
        Ok(url)
    }

    async fn handshake(&self) -> anyhow::Result<WsStream> {
        let url = self.endpoint()?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("WebSocket URL has no host: {}", self.config.ws_url),
        };

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("User-Agent", format!("{}/{}", Config::app_name(), Config::app_version()))
            .body(())?;

        log::info!("Connecting to {}...", self.config.ws_url);
        let (mut ws_stream, _) = connect_async(request).await?;

        // 发送 setup 消息，等待服务端确认
        let setup = SetupMessage::new(
            &self.config.model,
            &self.config.voice,
            &self.config.system_instruction,
        );
        let setup_json = serde_json::to_string(&setup)?;
        log::debug!("Sending setup: {}", setup_json);
        ws_stream.send(Message::Text(setup_json.into())).await?;

        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if parse_server_message(text.as_bytes()).is_some_and(|m| m.is_setup_complete()) {
                        return Ok(ws_stream);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if parse_server_message(&data).is_some_and(|m| m.is_setup_complete()) {
                        return Ok(ws_stream);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    anyhow::bail!("Server closed connection during setup: {:?}", frame)
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("Connection closed during setup"),
            }
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<ChannelHandle, SessionError> {
        let ws_stream = tokio::time::timeout(self.config.handshake_timeout, self.handshake())
            .await
            .map_err(|_| {
                SessionError::Channel(format!(
                    "Setup not acknowledged within {:?}",
                    self.config.handshake_timeout
                ))
            })?
            .map_err(|e| SessionError::Channel(format!("{:#}", e)))?;
        log::info!("Remote channel open");

        let (write, read) = ws_stream.split();
        let (tx_cmd, rx_cmd) = mpsc::channel(COMMAND_QUEUE);
        let (tx_event, rx_event) = mpsc::channel(EVENT_QUEUE);

        let link = NetLink {
            write,
            read,
            tx: tx_event,
            rx_cmd,
        };
        tokio::spawn(link.run());

        Ok(ChannelHandle {
            commands: tx_cmd,
            events: rx_event,
        })
    }
}

fn parse_server_message(data: &[u8]) -> Option<ServerMessage> {
    match serde_json::from_slice::<ServerMessage>(data) {
        Ok(msg) => Some(msg),
        Err(e) => {
            log::warn!("Dropping unparseable server frame ({} bytes): {}", data.len(), e);
            None
        }
    }
}

/// Owns the websocket for the lifetime of one session.
struct NetLink {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    tx: mpsc::Sender<NetEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    async fn run(mut self) {
        let event = match self.pump().await {
            Ok(reason) => NetEvent::Closed(reason),
            Err(e) => NetEvent::Error(format!("{:#}", e)),
        };
        log::info!("Remote channel finished: {:?}", event);
        let _ = self.tx.send(event).await;
    }

    // 主循环，处理读取和写入
    async fn pump(&mut self) -> anyhow::Result<Option<String>> {
        let mut closing = false;
        loop {
            tokio::select! {
                msg = self.read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.forward(text.as_bytes()).await?,
                        Some(Ok(Message::Binary(data))) => self.forward(&data).await?,
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Ok(frame.map(|f| f.reason.as_str().to_string()).filter(|r| !r.is_empty()));
                        }
                        Some(Ok(_)) => {}
                        // the peer may drop the socket right after our close frame
                        Some(Err(_)) | None if closing => return Ok(None),
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(None),
                    }
                }
                // session gone, possibly while still waiting for the peer's close
                _ = self.tx.closed() => {
                    log::info!("Session dropped the channel, closing socket");
                    return Ok(None);
                }
                cmd = self.rx_cmd.recv(), if !closing => {
                    match cmd {
                        Some(NetCommand::Send(msg)) => {
                            let json = serde_json::to_string(&RealtimeInputMessage::from(msg))?;
                            self.write.send(Message::Text(json.into())).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            log::info!("Closing remote channel");
                            closing = true;
                            self.write.send(Message::Close(None)).await?;
                        }
                    }
                }
            }
        }
    }

    async fn forward(&self, data: &[u8]) -> anyhow::Result<()> {
        let Some(msg) = parse_server_message(data) else {
            return Ok(());
        };
        if let Some(go_away) = &msg.go_away {
            log::warn!("Server is going away, time left: {:?}", go_away.time_left);
        }
        let inbound = InboundMessage::from(msg);
        if inbound.is_empty() {
            return Ok(());
        }
        self.tx.send(NetEvent::Message(inbound)).await?;
        Ok(())
    }
}
