use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    network: Network,
    model: Model,
    audio: Audio,
    ui: Ui,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    api_key: String,
    handshake_timeout_ms: u64,
    close_timeout_ms: u64,
}

#[derive(Deserialize)]
struct Model {
    name: String,
    voice: String,
    system_instruction: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Ui {
    local_ip: String,
    local_port: u16,
    remote_ip: String,
    remote_port: u16,
    buffer_size: usize,
    auto_connect: bool,
}

// rustc-env 是按行解析的，多行文本需要压成一行
fn emit(key: &str, value: impl ToString) {
    let value = value.to_string();
    let flat = value.split_whitespace().collect::<Vec<_>>().join(" ");
    println!("cargo:rustc-env={}={}", key, flat);
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    emit("APP_NAME", &config.application.name);
    emit("APP_VERSION", &config.application.version);

    // 网络配置
    emit("WS_URL", &config.network.ws_url);
    emit("API_KEY", &config.network.api_key);
    emit("HANDSHAKE_TIMEOUT_MS", config.network.handshake_timeout_ms);
    emit("CLOSE_TIMEOUT_MS", config.network.close_timeout_ms);

    // 模型与会话参数
    emit("MODEL_NAME", &config.model.name);
    emit("VOICE_NAME", &config.model.voice);
    emit("SYSTEM_INSTRUCTION", &config.model.system_instruction);

    // 音频设备
    emit("CAPTURE_DEVICE", &config.audio.capture_device);
    emit("PLAYBACK_DEVICE", &config.audio.playback_device);
    emit("PLAYBACK_PERIOD_SIZE", config.audio.playback_period_size);

    // UI 进程配置
    emit("UI_LOCAL_IP", &config.ui.local_ip);
    emit("UI_LOCAL_PORT", config.ui.local_port);
    emit("UI_REMOTE_IP", &config.ui.remote_ip);
    emit("UI_REMOTE_PORT", config.ui.remote_port);
    emit("UI_BUFFER_SIZE", config.ui.buffer_size);
    emit("UI_AUTO_CONNECT", config.ui.auto_connect);
}
