//! Frame timing.

use std::time::Instant;

/// Simple frame timer.
///
/// Tracks total elapsed time and the delta since the previous frame. The
/// renderer uses the elapsed time to animate the clear color.
pub struct Timer {
    start: Instant,
    last_frame: Instant,
}

impl Timer {
    /// Creates a timer starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
        }
    }

    /// Seconds since the previous call to `delta_secs` (or creation).
    pub fn delta_secs(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        delta
    }

    /// Seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_monotonic() {
        let timer = Timer::new();
        let a = timer.elapsed_secs();
        let b = timer.elapsed_secs();
        assert!(b >= a);
    }

    #[test]
    fn test_delta_is_non_negative() {
        let mut timer = Timer::new();
        assert!(timer.delta_secs() >= 0.0);
        assert!(timer.delta_secs() >= 0.0);
    }
}
