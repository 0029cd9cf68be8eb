use live_voice_rs::audio::AlsaBackend;
use live_voice_rs::config::{API_KEY_ENV, Config};
use live_voice_rs::controller::SessionController;
use live_voice_rs::events::{SessionEvent, UserCommand};
use live_voice_rs::net_link::WsConnector;
use live_voice_rs::ui_bridge::UiBridge;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Arc::new(Config::new()?);
    log::info!("{} v{} starting", Config::app_name(), Config::app_version());
    if config.api_key.is_empty() {
        log::warn!("No API key configured, set {} or network.api_key", API_KEY_ENV);
    }

    // 命令通道：UI -> 控制器
    let (tx_cmd, rx_cmd) = mpsc::channel::<UserCommand>(16);
    // 事件通道：控制器 -> UI
    let (tx_event, mut rx_event) = mpsc::channel::<SessionEvent>(256);

    // 启动UI桥
    let ui_bridge = Arc::new(UiBridge::new(&config, tx_cmd.clone()).await?);
    let ui_bridge_clone = ui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = ui_bridge_clone.run().await {
            log::error!("UiBridge error: {}", e);
        }
    });

    let controller = SessionController::new(
        config.clone(),
        Arc::new(WsConnector::new(config.clone())),
        Arc::new(AlsaBackend::new(&config)),
        tx_event,
    );
    let controller_task = tokio::spawn(controller.run(rx_cmd));

    if config.auto_connect {
        tx_cmd.send(UserCommand::Connect).await?;
    }

    // 主循环：转发会话事件到UI，等待退出信号
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Ctrl-C received, shutting down");
                if tx_cmd.send(UserCommand::Shutdown).await.is_err() {
                    log::warn!("Controller already stopped");
                }
                break;
            }
            event = rx_event.recv() => {
                let Some(event) = event else {
                    log::info!("Session controller exited");
                    break;
                };
                match &event {
                    SessionEvent::Status { status } => log::info!("Status: {:?}", status),
                    SessionEvent::Transcription(t) if t.is_complete => {
                        log::info!("[{:?}] turn complete", t.sender)
                    }
                    SessionEvent::Transcription(t) => log::info!("[{:?}] {}", t.sender, t.text),
                    SessionEvent::Volume(v) => {
                        log::trace!("Volume in={:.3} out={:.3}", v.input, v.output)
                    }
                }
                if let Err(e) = ui_bridge.send_event(&event).await {
                    log::debug!("Failed to send to UI: {}", e);
                }
            }
        }
    }

    // 等控制器释放设备和连接
    drop(rx_event);
    controller_task.await?;
    Ok(())
}
