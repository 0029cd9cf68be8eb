use std::time::Duration;

use anyhow::{Context, Result};

/// 运行时覆盖编译期 API key 的环境变量
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    // 网络配置
    pub ws_url: String,
    pub api_key: String,
    pub handshake_timeout: Duration,
    pub close_timeout: Duration,

    // 模型与会话参数
    pub model: String,
    pub voice: String,
    pub system_instruction: String,

    // 音频设备
    pub capture_device: String,
    pub playback_device: String,
    pub playback_period_size: usize,

    // UI进程配置
    pub ui_local_ip: String,
    pub ui_local_port: u16,
    pub ui_remote_ip: String,
    pub ui_remote_port: u16,
    pub ui_buffer_size: usize,
    pub auto_connect: bool,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取，API key 可在运行时覆盖
    pub fn new() -> Result<Self> {
        let api_key = match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => env!("API_KEY").to_string(),
        };

        Ok(Self {
            ws_url: env!("WS_URL").to_string(),
            api_key,
            handshake_timeout: Duration::from_millis(
                env!("HANDSHAKE_TIMEOUT_MS")
                    .parse()
                    .context("Failed to parse HANDSHAKE_TIMEOUT_MS")?,
            ),
            close_timeout: Duration::from_millis(
                env!("CLOSE_TIMEOUT_MS")
                    .parse()
                    .context("Failed to parse CLOSE_TIMEOUT_MS")?,
            ),

            model: env!("MODEL_NAME").to_string(),
            voice: env!("VOICE_NAME").to_string(),
            system_instruction: env!("SYSTEM_INSTRUCTION").to_string(),

            capture_device: env!("CAPTURE_DEVICE").to_string(),
            playback_device: env!("PLAYBACK_DEVICE").to_string(),
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE")
                .parse()
                .context("Failed to parse PLAYBACK_PERIOD_SIZE")?,

            ui_local_ip: env!("UI_LOCAL_IP").to_string(),
            ui_local_port: env!("UI_LOCAL_PORT")
                .parse()
                .context("Failed to parse UI_LOCAL_PORT")?,
            ui_remote_ip: env!("UI_REMOTE_IP").to_string(),
            ui_remote_port: env!("UI_REMOTE_PORT")
                .parse()
                .context("Failed to parse UI_REMOTE_PORT")?,
            ui_buffer_size: env!("UI_BUFFER_SIZE")
                .parse()
                .context("Failed to parse UI_BUFFER_SIZE")?,
            auto_connect: env!("UI_AUTO_CONNECT")
                .parse()
                .context("Failed to parse UI_AUTO_CONNECT")?,
        })
    }

    pub fn app_name() -> &'static str {
        env!("APP_NAME")
    }

    pub fn app_version() -> &'static str {
        env!("APP_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baked_config_parses() {
        let config = Config::new().unwrap();
        assert!(config.ws_url.starts_with("ws"));
        assert!(config.handshake_timeout > Duration::ZERO);
        assert!(config.playback_period_size > 0);
        assert!(!config.system_instruction.contains('\n'));
    }
}
