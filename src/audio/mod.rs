//! audio - microphone capture, gap-free playback and PCM codec
//!
//! Uses ALSA for audio I/O. Capture and playback each run in a dedicated OS
//! thread; the session only touches them through the `FrameSource` and
//! `OutputDevice` seams.

mod alsa_device;
pub mod backend;
pub mod capture;
mod output;
pub mod pcm_codec;
pub mod playback;

pub use backend::{AlsaBackend, AudioBackend};
pub use capture::{AudioCaptureEngine, EncodedFrame, FrameSource};
pub use output::AlsaOutput;
pub use playback::{OutputDevice, PlaybackEvent, PlaybackScheduler, PlaybackSegment, SegmentId};

/// Microphone sample rate sent to the remote endpoint.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of the synthesized speech coming back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Both directions are mono.
pub const CHANNELS: u16 = 1;
/// Samples per capture frame (256 ms at 16 kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;
/// MIME type attached to every outbound audio frame.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";
