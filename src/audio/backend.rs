//! Opens the session's audio devices.

use tokio::sync::mpsc;

use super::capture::{AlsaCapture, FrameSource};
use super::output::AlsaOutput;
use super::playback::{OutputDevice, PlaybackEvent};
use crate::config::Config;
use crate::error::SessionError;

/// Factory for the two devices a session owns exclusively.
pub trait AudioBackend: Send + Sync {
    /// Acquire the microphone. Failure means the session cannot capture.
    fn open_capture(&self) -> Result<Box<dyn FrameSource>, SessionError>;

    /// Acquire the speaker. Natural segment completions go to `events`.
    fn open_output(
        &self,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn OutputDevice>, SessionError>;
}

pub struct AlsaBackend {
    capture_device: String,
    playback_device: String,
    playback_period_size: usize,
}

impl AlsaBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            capture_device: config.capture_device.clone(),
            playback_device: config.playback_device.clone(),
            playback_period_size: config.playback_period_size,
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_capture(&self) -> Result<Box<dyn FrameSource>, SessionError> {
        // ALSA reports a denied or missing microphone the same way: the open fails
        let capture = AlsaCapture::open(&self.capture_device)
            .map_err(|e| SessionError::Permission(format!("{:#}", e)))?;
        Ok(Box::new(capture))
    }

    fn open_output(
        &self,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn OutputDevice>, SessionError> {
        let output = AlsaOutput::open(&self.playback_device, self.playback_period_size, events)
            .map_err(|e| SessionError::Device(format!("{:#}", e)))?;
        Ok(Box::new(output))
    }
}
