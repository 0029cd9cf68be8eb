//! Gap-free playback scheduling on top of an output device clock.
//!
//! Segments are laid end to end using a rolling watermark (`next_start_time`):
//! each new segment starts at `max(watermark, device clock)` and pushes the
//! watermark forward by its duration. Arrivals that outpace playback queue up
//! back-to-back; arrivals that lag behind start immediately instead of
//! accumulating latency.

use std::collections::HashSet;

/// A decoded, playable block of interleaved f32 samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSegment {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PlaybackSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Frame `index` downmixed to mono.
    pub fn frame_mono(&self, index: usize) -> f32 {
        let ch = self.channels as usize;
        let frame = &self.samples[index * ch..(index + 1) * ch];
        frame.iter().sum::<f32>() / ch as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u64);

/// Reported by an output device when a segment finishes on its own.
/// Segments removed with [`OutputDevice::stop`] produce no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Ended(SegmentId),
}

/// Push-based scheduled playback sink with a readable monotonic clock.
pub trait OutputDevice: Send {
    /// Current playback position in seconds.
    fn clock(&self) -> f64;

    /// Queue `segment` to start at device time `at` (seconds).
    fn start(&mut self, id: SegmentId, segment: PlaybackSegment, at: f64);

    /// Stop a segment immediately. Unknown or already finished ids are ignored.
    fn stop(&mut self, id: SegmentId);

    /// Release the device. Further calls are no-ops.
    fn close(&mut self);
}

/// Where a segment landed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scheduled {
    pub id: SegmentId,
    pub start_at: f64,
    pub duration: f64,
}

pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    next_start_time: f64,
    live: HashSet<SegmentId>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            device,
            next_start_time: 0.0,
            live: HashSet::new(),
            next_id: 0,
        }
    }

    pub fn schedule(&mut self, segment: PlaybackSegment) -> Scheduled {
        let id = SegmentId(self.next_id);
        self.next_id += 1;

        let start_at = self.next_start_time.max(self.device.clock());
        let duration = segment.duration();
        self.device.start(id, segment, start_at);
        self.next_start_time = start_at + duration;
        self.live.insert(id);

        log::trace!(
            "Scheduled segment {:?} at {:.3}s for {:.3}s ({} live)",
            id,
            start_at,
            duration,
            self.live.len()
        );
        Scheduled {
            id,
            start_at,
            duration,
        }
    }

    /// Record a natural completion. Returns true when this was the last live
    /// segment, i.e. playback just went idle. Ids that were already flushed
    /// are ignored.
    pub fn on_segment_ended(&mut self, id: SegmentId) -> bool {
        self.live.remove(&id) && self.live.is_empty()
    }

    /// Stop and discard everything in flight and reset the watermark.
    /// Returns the number of segments that were stopped.
    pub fn flush(&mut self) -> usize {
        let stopped = self.live.len();
        for id in self.live.drain() {
            self.device.stop(id);
        }
        self.next_start_time = 0.0;
        if stopped > 0 {
            log::debug!("Flushed {} playback segments", stopped);
        }
        stopped
    }

    /// Flush and release the output device.
    pub fn close(&mut self) {
        self.flush();
        self.device.close();
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
