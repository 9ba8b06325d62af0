use std::time::{Duration, Instant};

/// Upper bound for a single frame's time step.
///
/// Long stalls (a minimised window, a debugger break) would otherwise make
/// every time-integrating effect jump.
pub const MAX_FRAME_DELTA: Duration = Duration::from_millis(100);

/// Time values handed to the uniform set for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeSample {
    /// Accumulated running time in seconds.
    pub seconds: f32,
    /// Clamped step since the previous frame (zero while paused).
    pub delta: f32,
    /// Index of the frame being rendered.
    pub frame_index: u64,
}

/// Per-session clock: accumulated time, frame counter and run flag.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last_tick: Option<Instant>,
    elapsed: Duration,
    delta: Duration,
    frame: u64,
    running: bool,
}

impl FrameClock {
    pub fn new(running: bool) -> Self {
        Self {
            last_tick: None,
            elapsed: Duration::ZERO,
            delta: Duration::ZERO,
            frame: 0,
            running,
        }
    }

    /// Advances the clock to `now` and returns the values for this frame.
    pub fn tick(&mut self, now: Instant) -> TimeSample {
        let step = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).min(MAX_FRAME_DELTA))
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);

        if self.running {
            self.delta = step;
            self.elapsed += step;
        } else {
            self.delta = Duration::ZERO;
        }
        self.sample()
    }

    /// Called once the frame was submitted.
    pub fn finish_frame(&mut self) {
        if self.running {
            self.frame = self.frame.saturating_add(1);
        }
    }

    pub fn sample(&self) -> TimeSample {
        TimeSample {
            seconds: self.elapsed.as_secs_f32(),
            delta: self.delta.as_secs_f32(),
            frame_index: self.frame,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn toggle(&mut self) -> bool {
        self.running = !self.running;
        self.running
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_zero_delta() {
        let mut clock = FrameClock::default();
        let sample = clock.tick(Instant::now());
        assert_eq!(sample.seconds, 0.0);
        assert_eq!(sample.delta, 0.0);
        assert_eq!(sample.frame_index, 0);
    }

    #[test]
    fn delta_is_clamped() {
        let start = Instant::now();
        let mut clock = FrameClock::default();
        clock.tick(start);
        clock.finish_frame();
        let sample = clock.tick(start + Duration::from_secs(5));
        assert!((sample.delta - 0.1).abs() < 1e-6);
        assert!((sample.seconds - 0.1).abs() < 1e-6);
        assert_eq!(sample.frame_index, 1);
    }

    #[test]
    fn pause_freezes_time_and_frames() {
        let start = Instant::now();
        let step = Duration::from_millis(16);
        let mut clock = FrameClock::default();
        clock.tick(start);
        clock.finish_frame();
        clock.tick(start + step);
        clock.finish_frame();
        let before = clock.sample();

        clock.set_running(false);
        for i in 2..6 {
            let sample = clock.tick(start + step * i);
            clock.finish_frame();
            assert_eq!(sample.frame_index, before.frame_index);
            assert_eq!(sample.seconds, before.seconds);
            assert_eq!(sample.delta, 0.0);
        }

        assert!(clock.toggle());
        let resumed = clock.tick(start + step * 6);
        assert_eq!(resumed.frame_index, before.frame_index);
        clock.finish_frame();
        assert_eq!(clock.frame(), before.frame_index + 1);
        assert!(resumed.seconds > before.seconds);
    }
}
