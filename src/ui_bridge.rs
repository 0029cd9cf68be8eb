use crate::config::Config;
use crate::events::{SessionEvent, UserCommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Local UDP link to the UI process.
///
/// Inbound datagrams are JSON commands (`{"type":"toggle"}`), outbound ones
/// are serialized [`SessionEvent`]s.
pub struct UiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<UserCommand>,
}

// UI进程和Core进程通过本地UDP通信，端口在配置中指定
impl UiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<UserCommand>) -> anyhow::Result<Self> {
        let socket =
            UdpSocket::bind(format!("{}:{}", config.ui_local_ip, config.ui_local_port)).await?;
        let target_addr = format!("{}:{}", config.ui_remote_ip, config.ui_remote_port);
        log::info!(
            "UI bridge listening on {}, sending to {}",
            socket.local_addr()?,
            target_addr
        );

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            buffer_size: config.ui_buffer_size.max(64),
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive commands until the controller side goes away.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let cmd = match serde_json::from_slice::<UserCommand>(&buf[..len]) {
                Ok(cmd) => cmd,
                Err(e) => {
                    log::warn!(
                        "Ignoring UI message from {}: {} ({})",
                        from,
                        String::from_utf8_lossy(&buf[..len]),
                        e
                    );
                    continue;
                }
            };
            log::debug!("UI command from {}: {:?}", from, cmd);
            if self.tx.send(cmd).await.is_err() {
                log::info!("Controller gone, UI bridge stopping");
                break;
            }
        }
        Ok(())
    }

    pub async fn send_event(&self, event: &SessionEvent) -> anyhow::Result<()> {
        let msg = serde_json::to_string(event)?;
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConnectionStatus;

    async fn bridge_pair() -> (Arc<UiBridge>, UdpSocket, mpsc::Receiver<UserCommand>) {
        let ui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::new().unwrap();
        config.ui_local_ip = "127.0.0.1".into();
        config.ui_local_port = 0;
        config.ui_remote_ip = "127.0.0.1".into();
        config.ui_remote_port = ui.local_addr().unwrap().port();

        let (tx, rx) = mpsc::channel(8);
        let bridge = Arc::new(UiBridge::new(&config, tx).await.unwrap());
        (bridge, ui, rx)
    }

    #[tokio::test]
    async fn commands_are_parsed_and_junk_is_skipped() {
        let (bridge, ui, mut rx) = bridge_pair().await;
        let addr = bridge.local_addr().unwrap();
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        ui.send_to(b"not json", addr).await.unwrap();
        ui.send_to(br#"{"type":"reboot"}"#, addr).await.unwrap();
        ui.send_to(br#"{"type":"connect"}"#, addr).await.unwrap();
        ui.send_to(br#"{"type":"disconnect"}"#, addr).await.unwrap();

        assert_eq!(rx.recv().await, Some(UserCommand::Connect));
        assert_eq!(rx.recv().await, Some(UserCommand::Disconnect));
    }

    #[tokio::test]
    async fn events_go_out_as_json() {
        let (bridge, ui, _rx) = bridge_pair().await;
        bridge
            .send_event(&SessionEvent::Status {
                status: ConnectionStatus::Connecting,
            })
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = ui.recv_from(&mut buf).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(value, serde_json::json!({"type": "status", "status": "CONNECTING"}));
    }
}
