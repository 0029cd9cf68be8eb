//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::{CAPTURE_FRAME_SAMPLES, CHANNELS, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// What a session asks of a PCM device. Always interleaved S16LE.
#[derive(Debug, Clone, Copy)]
struct PcmFormat {
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
}

impl PcmFormat {
    fn label(&self) -> &'static str {
        match self.direction {
            Direction::Capture => "Capture",
            Direction::Playback => "Playback",
        }
    }

    // 采样率和声道数必须完全一致，不做重采样
    fn check(&self, device: &str, params: &AlsaParams) -> Result<()> {
        if params.sample_rate != self.sample_rate || params.channels != self.channels {
            anyhow::bail!(
                "{} device '{}' negotiated {}Hz/{}ch, need {}Hz/{}ch (try a plughw: device)",
                self.label(),
                device,
                params.sample_rate,
                params.channels,
                self.sample_rate,
                self.channels
            );
        }
        Ok(())
    }
}

/// Open the microphone at the fixed session input format (16 kHz mono).
///
/// The period is sized to one capture frame so each read yields a full frame
/// in the common case.
pub fn open_capture(device: &str) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        PcmFormat {
            direction: Direction::Capture,
            sample_rate: INPUT_SAMPLE_RATE,
            channels: CHANNELS as u32,
            period_size: Some(CAPTURE_FRAME_SAMPLES),
        },
    )
}

/// Open the speaker at the fixed session output format (24 kHz mono).
pub fn open_playback(device: &str, period_size: Option<usize>) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        PcmFormat {
            direction: Direction::Playback,
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: CHANNELS as u32,
            period_size,
        },
    )
}

fn open_pcm(device: &str, format: PcmFormat) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, format.direction, false).with_context(|| {
        format!("Failed to open PCM device '{}' for {}", device, format.label())
    })?;

    let params = negotiate(&pcm, &format)
        .with_context(|| format!("Failed to configure {} device '{}'", format.label(), device))?;
    format.check(device, &params)?;

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        format.label(),
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );
    Ok((pcm, params))
}

/// Apply `format` and read back what the hardware actually accepted.
fn negotiate(pcm: &PCM, format: &PcmFormat) -> Result<AlsaParams> {
    let hwp = HwParams::any(pcm)?;
    hwp.set_access(Access::RWInterleaved)?;
    hwp.set_format(Format::S16LE)?;
    hwp.set_channels(format.channels)?;
    hwp.set_rate_near(format.sample_rate, ValueOr::Nearest)?;
    if let Some(frames) = format.period_size {
        hwp.set_period_size_near(frames as Frames, ValueOr::Nearest)?;
    }
    pcm.hw_params(&hwp)?;

    let current = pcm.hw_params_current()?;
    Ok(AlsaParams {
        sample_rate: current.get_rate()?,
        channels: current.get_channels()?,
        period_size: current.get_period_size()? as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_format() -> PcmFormat {
        PcmFormat {
            direction: Direction::Capture,
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
            period_size: Some(CAPTURE_FRAME_SAMPLES),
        }
    }

    #[test]
    fn exact_format_is_accepted_whatever_the_period() {
        let params = AlsaParams {
            sample_rate: 16_000,
            channels: 1,
            period_size: 4000,
        };
        assert!(capture_format().check("default", &params).is_ok());
    }

    #[test]
    fn resampled_or_stereo_device_is_rejected() {
        let format = capture_format();
        let wrong_rate = AlsaParams {
            sample_rate: 48_000,
            channels: 1,
            period_size: 4096,
        };
        let err = format.check("hw:0", &wrong_rate).unwrap_err().to_string();
        assert!(err.contains("Capture device 'hw:0' negotiated 48000Hz/1ch"));

        let stereo = AlsaParams {
            sample_rate: 16_000,
            channels: 2,
            period_size: 4096,
        };
        assert!(format.check("hw:0", &stereo).is_err());
    }
}
