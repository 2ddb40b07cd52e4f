//! Gapless playback scheduling over an owned output device.
//!
//! Frames decoded from the backend arrive with network jitter but must play
//! back-to-back. The scheduler keeps a monotonic `next_start` on the output
//! clock and places every frame at `max(next_start, now)`, so frames never
//! overlap and never shrink the gap below zero.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::codec::DecodedAudio;
use super::resample_linear;
use crate::error::{BridgeError, Result};

/// Output-device seam: an audio clock plus sample-accurate scheduling.
pub trait AudioOut {
    /// Current position of the output clock, in seconds.
    fn now(&self) -> f64;
    /// Schedule a mono buffer to start at `start_time` on the output clock.
    /// Returns a handle id that later shows up in `take_finished`.
    fn schedule(&mut self, samples: &[f32], sample_rate: u32, start_time: f64) -> u64;
    /// Drain the ids of buffers that have finished playing.
    fn take_finished(&mut self) -> Vec<u64>;
    /// Stop everything scheduled and forget it.
    fn stop_all(&mut self);
}

/// Schedules decoded frames back-to-back regardless of arrival jitter.
pub struct PlaybackScheduler {
    out: Box<dyn AudioOut>,
    next_start: f64,
    pending: HashSet<u64>,
}

impl PlaybackScheduler {
    pub fn new(out: Box<dyn AudioOut>) -> Self {
        let next_start = out.now();
        Self {
            out,
            next_start,
            pending: HashSet::new(),
        }
    }

    /// Schedule one decoded frame; returns its computed start time.
    pub fn enqueue(&mut self, audio: &DecodedAudio) -> f64 {
        let start = self.next_start.max(self.out.now());
        let id = self.out.schedule(audio.mono(), audio.sample_rate, start);
        self.pending.insert(id);
        self.next_start = start + audio.duration_secs();
        start
    }

    /// Reap finished handles. Returns true while playback is still pending.
    pub fn poll(&mut self) -> bool {
        for id in self.out.take_finished() {
            self.pending.remove(&id);
        }
        !self.pending.is_empty()
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Force-stop all pending playback and reset the scheduling clock.
    pub fn clear(&mut self) {
        self.out.stop_all();
        self.pending.clear();
        self.next_start = 0.0;
    }
}

/// One buffer placed on the output timeline.
struct Slot {
    id: u64,
    start: u64,
    samples: Vec<f32>,
}

struct Timeline {
    cursor: u64,
    slots: Vec<Slot>,
    finished: Vec<u64>,
}

/// Speaker output via cpal: an owned stream mixing scheduled buffers off a
/// shared sample timeline. The clock is the count of samples the callback
/// has rendered. Dropping releases the device.
pub struct SpeakerOut {
    _stream: cpal::Stream,
    timeline: Arc<Mutex<Timeline>>,
    device_rate: u32,
    next_id: u64,
}

impl SpeakerOut {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BridgeError::Acquisition {
                message: "no audio output device available".to_string(),
            })?;
        let config = device
            .default_output_config()
            .map_err(|e| BridgeError::Acquisition {
                message: e.to_string(),
            })?;

        let device_rate = config.sample_rate();
        let channels = config.channels() as usize;

        let timeline = Arc::new(Mutex::new(Timeline {
            cursor: 0,
            slots: Vec::new(),
            finished: Vec::new(),
        }));
        let shared = timeline.clone();
        let err_fn = |err| eprintln!("[Playback] stream error: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut timeline = match shared.lock() {
                            Ok(t) => t,
                            Err(_) => return,
                        };

                        let mut cursor = timeline.cursor;
                        for frame in data.chunks_mut(channels) {
                            let mut sample = 0.0f32;
                            for slot in timeline.slots.iter() {
                                if cursor >= slot.start {
                                    let offset = (cursor - slot.start) as usize;
                                    if let Some(&s) = slot.samples.get(offset) {
                                        sample += s;
                                    }
                                }
                            }
                            // Mono source fanned out to every device channel.
                            for out in frame.iter_mut() {
                                *out = sample;
                            }
                            cursor += 1;
                        }
                        timeline.cursor = cursor;

                        let done: Vec<u64> = timeline
                            .slots
                            .iter()
                            .filter(|s| cursor >= s.start + s.samples.len() as u64)
                            .map(|s| s.id)
                            .collect();
                        if !done.is_empty() {
                            timeline.slots.retain(|s| !done.contains(&s.id));
                            timeline.finished.extend(done);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| BridgeError::Acquisition {
                    message: e.to_string(),
                })?,
            _ => {
                return Err(BridgeError::Acquisition {
                    message: "unsupported output sample format".to_string(),
                })
            }
        };

        stream.play().map_err(|e| BridgeError::Acquisition {
            message: e.to_string(),
        })?;

        Ok(Self {
            _stream: stream,
            timeline,
            device_rate,
            next_id: 1,
        })
    }
}

impl AudioOut for SpeakerOut {
    fn now(&self) -> f64 {
        match self.timeline.lock() {
            Ok(t) => t.cursor as f64 / self.device_rate as f64,
            Err(_) => 0.0,
        }
    }

    fn schedule(&mut self, samples: &[f32], sample_rate: u32, start_time: f64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let ratio = self.device_rate as f64 / sample_rate as f64;
        let resampled = resample_linear(samples, ratio);
        let start = (start_time * self.device_rate as f64).round() as u64;

        if let Ok(mut timeline) = self.timeline.lock() {
            // Never place a buffer in the past; the callback would skip it.
            let start = start.max(timeline.cursor);
            timeline.slots.push(Slot {
                id,
                start,
                samples: resampled,
            });
        }
        id
    }

    fn take_finished(&mut self) -> Vec<u64> {
        match self.timeline.lock() {
            Ok(mut t) => std::mem::take(&mut t.finished),
            Err(_) => Vec::new(),
        }
    }

    fn stop_all(&mut self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.slots.clear();
            timeline.finished.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Fake device with a manually advanced clock.
    #[derive(Default)]
    struct FakeState {
        now: f64,
        scheduled: Vec<(u64, f64, f64)>, // (id, start, duration)
        finished: Vec<u64>,
        stopped: bool,
    }

    struct FakeOut {
        state: Rc<RefCell<FakeState>>,
        next_id: u64,
    }

    impl FakeOut {
        fn new() -> (Self, Rc<RefCell<FakeState>>) {
            let state = Rc::new(RefCell::new(FakeState::default()));
            (
                Self {
                    state: state.clone(),
                    next_id: 1,
                },
                state,
            )
        }
    }

    impl AudioOut for FakeOut {
        fn now(&self) -> f64 {
            self.state.borrow().now
        }

        fn schedule(&mut self, samples: &[f32], sample_rate: u32, start_time: f64) -> u64 {
            let id = self.next_id;
            self.next_id += 1;
            let duration = samples.len() as f64 / sample_rate as f64;
            self.state.borrow_mut().scheduled.push((id, start_time, duration));
            id
        }

        fn take_finished(&mut self) -> Vec<u64> {
            std::mem::take(&mut self.state.borrow_mut().finished)
        }

        fn stop_all(&mut self) {
            self.state.borrow_mut().stopped = true;
        }
    }

    fn frame(samples: usize) -> DecodedAudio {
        DecodedAudio {
            channels: vec![vec![0.1; samples]],
            sample_rate: 24_000,
        }
    }

    #[test]
    fn frames_are_scheduled_back_to_back() {
        let (out, state) = FakeOut::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(out));

        // Three 100 ms frames arriving in a burst
        for _ in 0..3 {
            scheduler.enqueue(&frame(2400));
        }

        let scheduled = state.borrow().scheduled.clone();
        assert_eq!(scheduled.len(), 3);
        for window in scheduled.windows(2) {
            let (_, start_a, dur_a) = window[0];
            let (_, start_b, _) = window[1];
            assert!(
                start_b >= start_a + dur_a - 1e-9,
                "frame at {} overlaps previous ending at {}",
                start_b,
                start_a + dur_a
            );
        }
    }

    #[test]
    fn late_frame_starts_at_current_clock_not_in_the_past() {
        let (out, state) = FakeOut::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(out));

        scheduler.enqueue(&frame(2400)); // plays 0.0..0.1
        state.borrow_mut().now = 0.5; // long silence, clock moved past next_start
        let start = scheduler.enqueue(&frame(2400));
        assert!((start - 0.5).abs() < 1e-9);
    }

    #[test]
    fn jittered_arrivals_keep_start_times_monotonic() {
        let (out, state) = FakeOut::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(out));

        let mut last_end = 0.0f64;
        for (arrival, samples) in [(0.0, 2400), (0.01, 1200), (0.3, 4800), (0.31, 2400)] {
            state.borrow_mut().now = arrival;
            let start = scheduler.enqueue(&frame(samples));
            assert!(start + 1e-9 >= last_end, "gap shrank below zero");
            last_end = start + samples as f64 / 24_000.0;
        }
    }

    #[test]
    fn pending_set_empties_as_handles_finish() {
        let (out, state) = FakeOut::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(out));

        scheduler.enqueue(&frame(2400));
        scheduler.enqueue(&frame(2400));
        assert!(scheduler.poll());

        let ids: Vec<u64> = state.borrow().scheduled.iter().map(|s| s.0).collect();
        state.borrow_mut().finished.push(ids[0]);
        assert!(scheduler.poll(), "one handle still pending");

        state.borrow_mut().finished.push(ids[1]);
        assert!(!scheduler.poll(), "all handles finished");
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn clear_stops_the_device_and_resets_the_clock() {
        let (out, state) = FakeOut::new();
        let mut scheduler = PlaybackScheduler::new(Box::new(out));

        state.borrow_mut().now = 1.0;
        scheduler.enqueue(&frame(2400));
        scheduler.clear();

        assert!(state.borrow().stopped);
        assert!(!scheduler.is_pending());

        // After clear the schedule restarts from the device clock, not from
        // where the old session left off.
        state.borrow_mut().now = 0.0;
        let start = scheduler.enqueue(&frame(2400));
        assert!((start - 0.0).abs() < 1e-9);
    }
}
