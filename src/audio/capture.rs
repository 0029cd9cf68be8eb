//! Microphone capture: pull fixed frames, meter them, encode them, hand them off.
//!
//! Runs on a dedicated OS thread so a slow network never stalls the device.
//! Hand-off to the session uses `try_send`; a full queue drops the frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::alsa_device;
use super::pcm_codec::{encode_pcm16, i16_to_sample, to_base64};
use super::CAPTURE_FRAME_SAMPLES;

/// Pull-based microphone source at the fixed session input format.
pub trait FrameSource: Send {
    /// Block until `frame` has been filled with the next samples.
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<()>;
}

/// One captured frame, encoded for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub seq: u64,
    /// base64 of 16-bit little-endian PCM
    pub payload: String,
    /// RMS loudness of the raw frame
    pub rms: f32,
}

/// Root-mean-square loudness of a block of samples. Zero for an empty block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

pub struct AudioCaptureEngine {
    running: Arc<AtomicBool>,
    record_handle: Option<JoinHandle<()>>,
}

impl AudioCaptureEngine {
    /// Start pulling frames from `source` and pushing encoded frames to `tx`.
    pub fn start(source: Box<dyn FrameSource>, tx: mpsc::Sender<EncodedFrame>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));

        let record_handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    if let Err(e) = record_thread(source, tx, &running) {
                        log::error!("Recording thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            running,
            record_handle: Some(record_handle),
        })
    }

    /// Signal the capture thread to stop and wait for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.record_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_thread(
    mut source: Box<dyn FrameSource>,
    tx: mpsc::Sender<EncodedFrame>,
    running: &AtomicBool,
) -> Result<()> {
    let mut frame = vec![0f32; CAPTURE_FRAME_SAMPLES];
    let mut seq = 0u64;
    let mut dropped = 0u64;

    log::info!("Recording started: frame={} samples", CAPTURE_FRAME_SAMPLES);

    while running.load(Ordering::Relaxed) {
        source.read_frame(&mut frame)?;
        if !running.load(Ordering::Relaxed) {
            break;
        }

        let encoded = EncodedFrame {
            seq,
            payload: to_base64(&encode_pcm16(&frame)),
            rms: rms(&frame),
        };
        seq += 1;

        match tx.try_send(encoded) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                dropped += 1;
                log::warn!(
                    "Capture queue full, dropping frame {} ({} dropped so far)",
                    frame.seq,
                    dropped
                );
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Capture receiver dropped");
                break;
            }
        }
    }

    log::info!("Recording stopped after {} frames", seq);
    Ok(())
}

/// ALSA microphone at 16 kHz mono.
pub struct AlsaCapture {
    pcm: PCM,
    read_buf: Vec<i16>,
}

impl AlsaCapture {
    pub fn open(device: &str) -> Result<Self> {
        let (pcm, _params) = alsa_device::open_capture(device)?;
        Ok(Self {
            pcm,
            read_buf: vec![0i16; CAPTURE_FRAME_SAMPLES],
        })
    }
}

impl FrameSource for AlsaCapture {
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<()> {
        if self.read_buf.len() < frame.len() {
            self.read_buf.resize(frame.len(), 0);
        }
        let io = self.pcm.io_i16()?;
        let mut filled = 0;
        while filled < frame.len() {
            match io.readi(&mut self.read_buf[filled..frame.len()]) {
                Ok(n) => filled += n,
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    if let Err(e2) = self.pcm.prepare() {
                        log::error!("Failed to recover PCM capture: {}", e2);
                        return Err(e2.into());
                    }
                }
            }
        }
        for (dst, src) in frame.iter_mut().zip(&self.read_buf) {
            *dst = i16_to_sample(*src);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::pcm_codec::{decode_pcm16, from_base64};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Produces frames of a constant amplitude that grows by `step` each frame.
    pub(crate) struct RampSource {
        pub level: f32,
        pub step: f32,
        pub reads: Arc<AtomicUsize>,
        pub dropped: Arc<AtomicBool>,
    }

    impl RampSource {
        pub fn new(step: f32) -> Self {
            Self {
                level: 0.0,
                step,
                reads: Arc::new(AtomicUsize::new(0)),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl FrameSource for RampSource {
        fn read_frame(&mut self, frame: &mut [f32]) -> Result<()> {
            thread::sleep(Duration::from_millis(2));
            frame.fill(self.level);
            self.level = (self.level + self.step).min(1.0);
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for RampSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0.0; 4096]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_amplitude_is_its_magnitude() {
        assert!((rms(&[0.3; 4096]) - 0.3).abs() < 1e-6);
        assert!((rms(&[-0.7; 4096]) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn rms_of_square_wave() {
        let frame: Vec<f32> = (0..4096).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert!((rms(&frame) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn frames_arrive_in_capture_order() {
        let (tx, mut rx) = mpsc::channel(64);
        let source = RampSource::new(0.1);
        let dropped = source.dropped.clone();
        let mut engine = AudioCaptureEngine::start(Box::new(source), tx).unwrap();

        let mut frames = Vec::new();
        while frames.len() < 3 {
            frames.push(rx.recv().await.unwrap());
        }
        engine.stop();

        assert_eq!(frames.iter().map(|f| f.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(frames[0].rms, 0.0);
        assert!((frames[1].rms - 0.1).abs() < 1e-6);

        let pcm = decode_pcm16(&from_base64(&frames[1].payload).unwrap()).unwrap();
        assert_eq!(pcm.len(), CAPTURE_FRAME_SAMPLES);
        assert!((pcm[0] - 0.1).abs() <= 1.0 / 32768.0);

        assert!(dropped.load(Ordering::SeqCst), "source released on stop");
    }

    #[tokio::test]
    async fn full_queue_drops_frames_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let source = RampSource::new(0.0);
        let reads = source.reads.clone();
        let mut engine = AudioCaptureEngine::start(Box::new(source), tx).unwrap();

        while reads.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        engine.stop();

        assert_eq!(rx.recv().await.unwrap().seq, 0);
        assert!(rx.recv().await.is_none());
    }
}
