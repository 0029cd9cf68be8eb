//! ALSA output device with a sample-accurate timeline.
//!
//! A dedicated render thread (std::thread, not a tokio task) owns the playback
//! PCM. Each period it mixes whatever segments are due into one buffer and
//! writes it; the number of frames written so far is the device clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device::{self, AlsaParams};
use super::pcm_codec::sample_to_i16;
use super::playback::{OutputDevice, PlaybackEvent, PlaybackSegment, SegmentId};
use super::OUTPUT_SAMPLE_RATE;

struct Voice {
    id: SegmentId,
    start_frame: u64,
    segment: PlaybackSegment,
    cursor: usize,
}

/// Scheduled segments plus the running frame counter.
#[derive(Default)]
pub(crate) struct Timeline {
    clock_frames: u64,
    voices: Vec<Voice>,
}

impl Timeline {
    pub(crate) fn clock_frames(&self) -> u64 {
        self.clock_frames
    }

    pub(crate) fn add(&mut self, id: SegmentId, segment: PlaybackSegment, start_frame: u64) {
        self.voices.push(Voice {
            id,
            start_frame,
            segment,
            cursor: 0,
        });
    }

    pub(crate) fn remove(&mut self, id: SegmentId) {
        self.voices.retain(|v| v.id != id);
    }

    pub(crate) fn clear(&mut self) {
        self.voices.clear();
    }

    /// Mix the next `out.len()` frames and advance the clock.
    /// Returns the ids of segments that finished inside this period.
    pub(crate) fn render(&mut self, out: &mut [f32]) -> Vec<SegmentId> {
        out.fill(0.0);
        let period_start = self.clock_frames;
        let mut finished = Vec::new();

        self.voices.retain_mut(|voice| {
            let total = voice.segment.frames();
            for (i, slot) in out.iter_mut().enumerate() {
                if voice.cursor >= total {
                    break;
                }
                if period_start + (i as u64) < voice.start_frame {
                    continue;
                }
                *slot += voice.segment.frame_mono(voice.cursor);
                voice.cursor += 1;
            }
            if voice.cursor >= total {
                finished.push(voice.id);
                false
            } else {
                true
            }
        });

        self.clock_frames += out.len() as u64;
        finished
    }
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct AlsaOutput {
    timeline: Arc<Mutex<Timeline>>,
    running: Arc<AtomicBool>,
    play_handle: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl AlsaOutput {
    /// Open the playback device and start the render thread.
    ///
    /// Natural completions are reported on `events`.
    pub fn open(
        device: &str,
        period_size: usize,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Self> {
        let period = (period_size > 0).then_some(period_size);
        let (pcm, params) = alsa_device::open_playback(device, period)?;

        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let running = Arc::new(AtomicBool::new(true));
        let sample_rate = params.sample_rate;

        let play_handle = {
            let timeline = timeline.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    if let Err(e) = play_thread(pcm, params, &timeline, &running, &events) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };

        Ok(Self {
            timeline,
            running,
            play_handle: Some(play_handle),
            sample_rate,
        })
    }
}

impl OutputDevice for AlsaOutput {
    fn clock(&self) -> f64 {
        lock(&self.timeline).clock_frames() as f64 / self.sample_rate as f64
    }

    fn start(&mut self, id: SegmentId, segment: PlaybackSegment, at: f64) {
        if segment.sample_rate() != OUTPUT_SAMPLE_RATE {
            log::warn!(
                "Segment {:?} is {}Hz, output runs at {}Hz; playing at device rate",
                id,
                segment.sample_rate(),
                OUTPUT_SAMPLE_RATE
            );
        }
        let start_frame = (at.max(0.0) * self.sample_rate as f64).round() as u64;
        lock(&self.timeline).add(id, segment, start_frame);
    }

    fn stop(&mut self, id: SegmentId) {
        lock(&self.timeline).remove(id);
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.timeline).clear();
        if let Some(h) = self.play_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn play_thread(
    pcm: PCM,
    params: AlsaParams,
    timeline: &Mutex<Timeline>,
    running: &AtomicBool,
    events: &mpsc::UnboundedSender<PlaybackEvent>,
) -> Result<()> {
    let period = params.period_size.max(1);
    let io = pcm.io_i16()?;
    let mut mix = vec![0f32; period];
    let mut out = vec![0i16; period];

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        params.channels,
        period,
    );

    while running.load(Ordering::Relaxed) {
        let finished = lock(timeline).render(&mut mix);
        for id in finished {
            // receiver gone means the session is tearing down
            let _ = events.send(PlaybackEvent::Ended(id));
        }

        for (dst, src) in out.iter_mut().zip(&mix) {
            *dst = sample_to_i16(*src);
        }

        // Retry short writes and XRUNs without losing frames.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&out[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        return Err(e2.into());
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            period - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(frames: usize, value: f32) -> PlaybackSegment {
        PlaybackSegment::new(vec![value; frames], OUTPUT_SAMPLE_RATE, 1)
    }

    #[test]
    fn silence_advances_the_clock() {
        let mut timeline = Timeline::default();
        let mut buf = vec![1.0; 8];
        assert!(timeline.render(&mut buf).is_empty());
        assert!(buf.iter().all(|s| *s == 0.0));
        assert_eq!(timeline.clock_frames(), 8);
    }

    #[test]
    fn segment_starts_mid_period_and_reports_completion() {
        let mut timeline = Timeline::default();
        timeline.add(SegmentId(1), tone(6, 0.5), 4);

        let mut buf = vec![0.0; 8];
        assert!(timeline.render(&mut buf).is_empty());
        assert_eq!(buf, vec![0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5]);

        assert_eq!(timeline.render(&mut buf), vec![SegmentId(1)]);
        assert_eq!(&buf[..3], &[0.5, 0.5, 0.0]);
        assert_eq!(timeline.clock_frames(), 16);
    }

    #[test]
    fn adjacent_segments_leave_no_gap() {
        let mut timeline = Timeline::default();
        timeline.add(SegmentId(1), tone(3, 0.25), 0);
        timeline.add(SegmentId(2), tone(3, 0.5), 3);

        let mut buf = vec![0.0; 6];
        let finished = timeline.render(&mut buf);
        assert_eq!(buf, vec![0.25, 0.25, 0.25, 0.5, 0.5, 0.5]);
        assert_eq!(finished, vec![SegmentId(1), SegmentId(2)]);
    }

    #[test]
    fn stopped_segment_is_silent_and_not_reported() {
        let mut timeline = Timeline::default();
        timeline.add(SegmentId(7), tone(100, 0.5), 0);
        timeline.remove(SegmentId(7));
        timeline.remove(SegmentId(7));

        let mut buf = vec![0.0; 4];
        assert!(timeline.render(&mut buf).is_empty());
        assert!(buf.iter().all(|s| *s == 0.0));
    }
}
