//! Frame throttle: run detection on one frame out of every N.

use std::num::NonZeroU32;

/// Stateful modulo counter. The first call returns `true`, then every Nth.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    every_n: NonZeroU32,
    position: u32,
}

impl FrameThrottle {
    pub fn new(every_n: NonZeroU32) -> Self {
        Self { every_n, position: 0 }
    }

    /// Whether the current frame should go to detection.
    ///
    /// Frames that get `false` are still displayed, never matched.
    pub fn should_process(&mut self) -> bool {
        let process = self.position == 0;
        self.position = (self.position + 1) % self.every_n.get();
        process
    }

    pub fn every_n(&self) -> u32 {
        self.every_n.get()
    }

    /// Restart the cycle so the next frame is processed.
    pub fn reset(&mut self) {
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(n: u32) -> FrameThrottle {
        FrameThrottle::new(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn test_every_third_frame() {
        let mut t = throttle(3);
        let pattern: Vec<bool> = (0..9).map(|_| t.should_process()).collect();
        assert_eq!(
            pattern,
            vec![true, false, false, true, false, false, true, false, false]
        );
    }

    #[test]
    fn test_every_frame_when_n_is_one() {
        let mut t = throttle(1);
        assert!((0..100).all(|_| t.should_process()));
    }

    #[test]
    fn test_exactly_one_per_window_over_long_run() {
        let mut t = throttle(7);
        let processed = (0..7000).filter(|_| t.should_process()).count();
        assert_eq!(processed, 1000);
    }

    #[test]
    fn test_reset_restarts_cycle() {
        let mut t = throttle(3);
        assert!(t.should_process());
        assert!(!t.should_process());
        t.reset();
        assert!(t.should_process());
    }
}
