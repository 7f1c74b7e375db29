//! Suppression of repeated detections of the same plate on the same camera.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Smallest map size that triggers a prune pass.
const PRUNE_THRESHOLD: usize = 1024;

/// Remembers when each `(camera_id, plate)` pair was last emitted and rejects
/// repeats inside the window. A zero window lets everything through.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_emitted: HashMap<(u32, String), Instant>,
    /// Map size at which the next automatic prune runs. Doubles the live
    /// key count after each pass so a map full of unexpired keys is not
    /// walked on every insert.
    next_prune_at: usize,
    prune_passes: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
            next_prune_at: PRUNE_THRESHOLD,
            prune_passes: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Returns `true` if the detection should be emitted, recording it as the
    /// latest emission for its key.
    pub fn should_emit(&mut self, source_id: u32, label: &str, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let key = (source_id, label.to_string());
        if let Some(last) = self.last_emitted.get(&key)
            && now.saturating_duration_since(*last) < self.window
        {
            return false;
        }

        if self.last_emitted.len() >= self.next_prune_at {
            self.prune(now);
            self.next_prune_at = (self.last_emitted.len() * 2).max(PRUNE_THRESHOLD);
        }
        self.last_emitted.insert(key, now);
        true
    }

    /// Forget keys whose window has passed.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_emitted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
        self.prune_passes += 1;
    }

    pub fn tracked(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn prune_passes(&self) -> u64 {
        self.prune_passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppresses_within_window() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(debouncer.should_emit(1, "ABC1234", t0));
        assert!(!debouncer.should_emit(1, "ABC1234", t0 + Duration::from_millis(500)));
        assert!(!debouncer.should_emit(1, "ABC1234", t0 + Duration::from_millis(1999)));
        assert!(debouncer.should_emit(1, "ABC1234", t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_window_measured_from_last_emission() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(debouncer.should_emit(1, "ABC1234", t0));
        // Suppressed repeats do not extend the window
        assert!(!debouncer.should_emit(1, "ABC1234", t0 + Duration::from_millis(1500)));
        assert!(debouncer.should_emit(1, "ABC1234", t0 + Duration::from_millis(2100)));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let t0 = Instant::now();

        assert!(debouncer.should_emit(1, "ABC1234", t0));
        assert!(debouncer.should_emit(2, "ABC1234", t0));
        assert!(debouncer.should_emit(1, "XYZ5678", t0));
        assert_eq!(debouncer.tracked(), 3);
    }

    #[test]
    fn test_zero_window_disabled() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        let t0 = Instant::now();

        assert!(!debouncer.is_enabled());
        for _ in 0..5 {
            assert!(debouncer.should_emit(1, "ABC1234", t0));
        }
        assert_eq!(debouncer.tracked(), 0);
    }

    #[test]
    fn test_prune_drops_expired() {
        let mut debouncer = Debouncer::new(Duration::from_secs(1));
        let t0 = Instant::now();

        debouncer.should_emit(1, "ABC1234", t0);
        debouncer.should_emit(2, "XYZ5678", t0 + Duration::from_millis(900));
        debouncer.prune(t0 + Duration::from_millis(1500));
        assert_eq!(debouncer.tracked(), 1);
    }

    #[test]
    fn test_live_keys_do_not_prune_every_insert() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60));
        let t0 = Instant::now();

        for plate in 0..PRUNE_THRESHOLD {
            assert!(debouncer.should_emit(1, &format!("P{plate:05}"), t0));
        }
        assert_eq!(debouncer.prune_passes(), 0);

        // First insert past the threshold walks the map once; nothing has expired
        for plate in PRUNE_THRESHOLD..PRUNE_THRESHOLD + 500 {
            assert!(debouncer.should_emit(1, &format!("P{plate:05}"), t0));
        }
        assert_eq!(debouncer.prune_passes(), 1);
        assert_eq!(debouncer.tracked(), PRUNE_THRESHOLD + 500);
    }

    #[test]
    fn test_auto_prune_reclaims_expired_keys() {
        let mut debouncer = Debouncer::new(Duration::from_secs(1));
        let t0 = Instant::now();

        for plate in 0..PRUNE_THRESHOLD {
            debouncer.should_emit(1, &format!("P{plate:05}"), t0);
        }
        let later = t0 + Duration::from_secs(5);
        assert!(debouncer.should_emit(2, "NEW0001", later));

        assert_eq!(debouncer.prune_passes(), 1);
        assert_eq!(debouncer.tracked(), 1);
    }
}
