//! Frame timing.

use std::time::{Duration, Instant};

/// Averaged timings over one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub frames: u32,
    pub fps: f32,
    pub avg_frame_ms: f32,
}

impl FrameStats {
    fn from_window(frames: u32, window: Duration) -> Self {
        let secs = window.as_secs_f32();
        let fps = if secs > 0.0 { frames as f32 / secs } else { 0.0 };
        let avg_frame_ms = if frames > 0 {
            secs * 1000.0 / frames as f32
        } else {
            0.0
        };
        Self {
            frames,
            fps,
            avg_frame_ms,
        }
    }
}

/// Counts frames and reports [`FrameStats`] once per `report_interval`.
#[derive(Debug)]
pub struct FrameClock {
    window_start: Instant,
    frames_in_window: u32,
    report_interval: Duration,
}

impl FrameClock {
    pub fn new(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            window_start: now,
            frames_in_window: 0,
            report_interval,
        }
    }

    /// Record one frame. Returns stats when the reporting window closes.
    pub fn tick(&mut self) -> Option<FrameStats> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<FrameStats> {
        self.frames_in_window += 1;
        let window = now.saturating_duration_since(self.window_start);
        if window < self.report_interval {
            return None;
        }

        let stats = FrameStats::from_window(self.frames_in_window, window);
        self.window_start = now;
        self.frames_in_window = 0;
        Some(stats)
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_report_inside_window() {
        let mut clock = FrameClock::new(Duration::from_secs(1));
        let t0 = clock.window_start;
        assert!(clock.tick_at(t0 + Duration::from_millis(10)).is_none());
        assert!(clock.tick_at(t0 + Duration::from_millis(500)).is_none());
    }

    #[test]
    fn test_report_after_window() {
        let mut clock = FrameClock::new(Duration::from_secs(1));
        let t0 = clock.window_start;
        for i in 1..60 {
            assert!(clock.tick_at(t0 + Duration::from_millis(i * 10)).is_none());
        }
        let stats = clock
            .tick_at(t0 + Duration::from_secs(2))
            .expect("window elapsed");
        assert_eq!(stats.frames, 60);
        assert!((stats.fps - 30.0).abs() < 0.01);
        assert!((stats.avg_frame_ms - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_window_resets_after_report() {
        let mut clock = FrameClock::new(Duration::from_millis(100));
        let t0 = clock.window_start;
        assert!(clock.tick_at(t0 + Duration::from_millis(150)).is_some());
        assert!(clock.tick_at(t0 + Duration::from_millis(160)).is_none());
        assert_eq!(clock.frames_in_window, 1);
    }
}
