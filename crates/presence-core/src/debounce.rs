//! Per-identity attendance dispatch debouncing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cooldown tracker suppressing repeated dispatch for the same identity.
///
/// This is per-process, per-session smoothing: it keeps one person standing
/// in front of the camera from re-triggering the mark action every cycle.
/// The persisted per-day uniqueness constraint remains the correctness
/// guarantee.
#[derive(Debug)]
pub struct AttendanceDebouncer {
    cooldown: Duration,
    last_fired: HashMap<String, Instant>,
}

impl AttendanceDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: HashMap::new(),
        }
    }

    /// Whether a dispatch for `identity` at `now` should fire.
    ///
    /// Fires when the identity has never fired, or when the cooldown has
    /// fully elapsed (boundary inclusive: exactly at the threshold fires).
    /// Firing records `now`, so the table is monotonically non-decreasing.
    pub fn should_fire(&mut self, identity: &str, now: Instant) -> bool {
        let fire = match self.last_fired.get(identity) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) >= self.cooldown,
        };
        if fire {
            self.last_fired.insert(identity.to_string(), now);
        }
        fire
    }

    /// Number of distinct identities seen this session.
    pub fn tracked(&self) -> usize {
        self.last_fired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(5);

    #[test]
    fn first_sighting_always_fires() {
        let mut d = AttendanceDebouncer::new(COOLDOWN);
        assert!(d.should_fire("E001", Instant::now()));
    }

    #[test]
    fn hit_just_inside_window_is_suppressed() {
        let mut d = AttendanceDebouncer::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(d.should_fire("E001", t0));
        assert!(!d.should_fire("E001", t0 + Duration::from_millis(4999)));
    }

    #[test]
    fn hit_exactly_at_cooldown_fires() {
        let mut d = AttendanceDebouncer::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(d.should_fire("E001", t0));
        assert!(d.should_fire("E001", t0 + COOLDOWN));
    }

    #[test]
    fn two_hits_in_one_window_yield_one_dispatch() {
        let mut d = AttendanceDebouncer::new(COOLDOWN);
        let t0 = Instant::now();
        let fired = [
            d.should_fire("E001", t0),
            d.should_fire("E001", t0 + Duration::from_secs(1)),
            d.should_fire("E001", t0 + Duration::from_secs(3)),
        ];
        assert_eq!(fired.iter().filter(|&&f| f).count(), 1);
    }

    #[test]
    fn identities_are_tracked_independently() {
        let mut d = AttendanceDebouncer::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(d.should_fire("E001", t0));
        assert!(d.should_fire("E002", t0 + Duration::from_secs(1)));
        assert!(!d.should_fire("E001", t0 + Duration::from_secs(2)));
        assert_eq!(d.tracked(), 2);
    }

    #[test]
    fn firing_refreshes_the_window() {
        let mut d = AttendanceDebouncer::new(COOLDOWN);
        let t0 = Instant::now();
        assert!(d.should_fire("E001", t0));
        assert!(d.should_fire("E001", t0 + COOLDOWN));
        // Window now anchored at t0 + cooldown.
        assert!(!d.should_fire("E001", t0 + COOLDOWN + Duration::from_secs(4)));
        assert!(d.should_fire("E001", t0 + COOLDOWN + COOLDOWN));
    }
}
