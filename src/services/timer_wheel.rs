//! Deferred-transition deadlines, one per region identifier
//!
//! Scheduling an identifier that already has a deadline replaces it, so a
//! superseded deadline can never fire. The wheel is owned by the router task
//! that also handles stop requests, which makes `cancel` synchronous.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct TimerWheel {
    deadlines: FxHashMap<String, Instant>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the deadline for `identifier`
    ///
    /// Returns the previous deadline if one was replaced.
    pub fn schedule(&mut self, identifier: &str, at: Instant) -> Option<Instant> {
        self.deadlines.insert(identifier.to_string(), at)
    }

    /// Remove the deadline for `identifier`, returning it if present
    pub fn cancel(&mut self, identifier: &str) -> Option<Instant> {
        self.deadlines.remove(identifier)
    }

    /// Deadline currently armed for `identifier`
    #[inline]
    pub fn deadline(&self, identifier: &str) -> Option<Instant> {
        self.deadlines.get(identifier).copied()
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every identifier due at `now`
    ///
    /// Ordered by deadline, then identifier, so firing is deterministic.
    pub fn take_due(&mut self, now: Instant) -> SmallVec<[String; 4]> {
        let mut due: SmallVec<[(Instant, String); 4]> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, at)| (*at, id.clone()))
            .collect();

        if due.is_empty() {
            return SmallVec::new();
        }

        due.sort();
        for (_, id) in &due {
            self.deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_schedule_replaces_existing_deadline() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();

        assert_eq!(wheel.schedule("lobby", at(t0, 500)), None);
        assert_eq!(wheel.schedule("lobby", at(t0, 900)), Some(at(t0, 500)));
        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.deadline("lobby"), Some(at(t0, 900)));

        // The superseded deadline no longer fires
        assert!(wheel.take_due(at(t0, 600)).is_empty());
        assert_eq!(wheel.take_due(at(t0, 900)).as_slice(), ["lobby".to_string()]);
    }

    #[test]
    fn test_cancel_removes_deadline() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.schedule("lobby", at(t0, 100));

        assert_eq!(wheel.cancel("lobby"), Some(at(t0, 100)));
        assert_eq!(wheel.cancel("lobby"), None);
        assert!(wheel.is_empty());
        assert!(wheel.take_due(at(t0, 1000)).is_empty());
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        assert_eq!(wheel.next_deadline(), None);

        wheel.schedule("a", at(t0, 300));
        wheel.schedule("b", at(t0, 100));
        wheel.schedule("c", at(t0, 200));

        assert_eq!(wheel.next_deadline(), Some(at(t0, 100)));
    }

    #[test]
    fn test_take_due_orders_by_deadline_then_identifier() {
        let t0 = Instant::now();
        let mut wheel = TimerWheel::new();
        wheel.schedule("zeta", at(t0, 100));
        wheel.schedule("beta", at(t0, 200));
        wheel.schedule("alpha", at(t0, 200));
        wheel.schedule("late", at(t0, 5000));

        let due = wheel.take_due(at(t0, 200));
        assert_eq!(due.as_slice(), ["zeta".to_string(), "alpha".to_string(), "beta".to_string()]);
        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.next_deadline(), Some(at(t0, 5000)));
    }
}
