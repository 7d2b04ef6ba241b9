//! Nearest beacon selection
//!
//! Ranks the samples of one ranging cycle and reports a change only when the
//! winning *identity* differs from the stored nearest. A fresher reading of
//! the same beacon is a refresh, not a change.
//!
//! Ordering, best first:
//! 1. Proximity bucket (Immediate > Near > Far > Unknown)
//! 2. Smaller accuracy (unknown accuracy loses)
//! 3. Stronger rssi
//! 4. Smaller identity (uuid, major, minor)

use crate::domain::identity::BeaconIdentity;
use crate::domain::region::RegionWatch;
use crate::domain::sample::BeaconSample;
use std::cmp::Ordering;
use tracing::debug;

/// Compare two samples; `Less` means `a` is nearer than `b`
pub fn compare(a: &BeaconSample, b: &BeaconSample) -> Ordering {
    b.proximity
        .rank()
        .cmp(&a.proximity.rank())
        .then_with(|| compare_accuracy(a.known_accuracy(), b.known_accuracy()))
        .then_with(|| b.rssi.cmp(&a.rssi))
        .then_with(|| a.identity.cmp(&b.identity))
}

fn compare_accuracy(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Pick the nearest sample among those matching `pattern`
pub fn select<'a>(
    pattern: &BeaconIdentity,
    samples: &'a [BeaconSample],
) -> Option<&'a BeaconSample> {
    samples.iter().filter(|s| pattern.matches(&s.identity)).min_by(|a, b| compare(a, b))
}

/// Update `watch.nearest` from one ranging cycle
///
/// Returns the new nearest identity when it changed, `None` otherwise.
/// An empty cycle leaves the stored nearest untouched.
pub fn update(watch: &mut RegionWatch, samples: &[BeaconSample]) -> Option<BeaconIdentity> {
    let winner = select(&watch.identity, samples)?;

    if watch.nearest == Some(winner.identity) {
        return None;
    }

    debug!(
        identifier = %watch.identifier,
        previous = ?watch.nearest.map(|n| n.to_string()),
        nearest = %winner.identity,
        proximity = %winner.proximity.as_str(),
        accuracy = %winner.accuracy,
        rssi = %winner.rssi,
        "nearest_selected"
    );
    watch.nearest = Some(winner.identity);
    Some(winner.identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::parse_uuid;
    use crate::domain::region::Subscription;
    use crate::domain::sample::Proximity;
    use std::time::{Duration, Instant};

    const UUID: &str = "e2c56db5-dffb-48d2-b060-d0f5a71096e0";

    fn beacon(minor: u16) -> BeaconIdentity {
        BeaconIdentity::observed(parse_uuid(UUID).unwrap(), 1, minor)
    }

    fn sample(minor: u16, proximity: Proximity, accuracy: f64, rssi: i32) -> BeaconSample {
        BeaconSample::new(beacon(minor), rssi, proximity, accuracy, Instant::now())
    }

    fn watch() -> RegionWatch {
        RegionWatch::new(
            "lobby",
            BeaconIdentity::parse(UUID, None, None).unwrap(),
            Duration::ZERO,
            Subscription::new("lobby"),
        )
    }

    #[test]
    fn test_bucket_beats_accuracy() {
        let samples = vec![
            sample(1, Proximity::Near, 1.0, -50),
            sample(2, Proximity::Immediate, 0.5, -70),
        ];
        assert_eq!(select(&watch().identity, &samples).unwrap().identity, beacon(2));

        // Still true when the immediate one reports a larger accuracy
        let samples = vec![
            sample(1, Proximity::Near, 0.2, -50),
            sample(2, Proximity::Immediate, 0.9, -70),
        ];
        assert_eq!(select(&watch().identity, &samples).unwrap().identity, beacon(2));
    }

    #[test]
    fn test_unknown_bucket_always_loses() {
        let samples = vec![
            sample(1, Proximity::Unknown, 0.1, -40),
            sample(2, Proximity::Far, 9.0, -90),
        ];
        assert_eq!(select(&watch().identity, &samples).unwrap().identity, beacon(2));
    }

    #[test]
    fn test_accuracy_then_rssi_then_identity() {
        let samples = vec![
            sample(1, Proximity::Near, 2.0, -50),
            sample(2, Proximity::Near, 1.0, -80),
        ];
        assert_eq!(select(&watch().identity, &samples).unwrap().identity, beacon(2));

        let samples = vec![
            sample(1, Proximity::Near, 1.0, -80),
            sample(2, Proximity::Near, 1.0, -60),
        ];
        assert_eq!(select(&watch().identity, &samples).unwrap().identity, beacon(2));

        let samples = vec![
            sample(3, Proximity::Near, 1.0, -60),
            sample(2, Proximity::Near, 1.0, -60),
        ];
        assert_eq!(select(&watch().identity, &samples).unwrap().identity, beacon(2));
    }

    #[test]
    fn test_unknown_accuracy_loses_within_bucket() {
        let samples = vec![
            sample(1, Proximity::Far, -1.0, -40),
            sample(2, Proximity::Far, 8.0, -90),
        ];
        assert_eq!(select(&watch().identity, &samples).unwrap().identity, beacon(2));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut samples = vec![
            sample(4, Proximity::Near, 1.0, -60),
            sample(2, Proximity::Near, 1.0, -60),
            sample(3, Proximity::Near, 1.0, -60),
        ];
        let first = select(&watch().identity, &samples).unwrap().identity;
        samples.reverse();
        let second = select(&watch().identity, &samples).unwrap().identity;
        assert_eq!(first, second);
        assert_eq!(first, beacon(2));
    }

    #[test]
    fn test_update_reports_change_once() {
        let mut w = watch();

        let changed = update(&mut w, &[sample(1, Proximity::Near, 1.0, -60)]);
        assert_eq!(changed, Some(beacon(1)));
        assert_eq!(w.nearest, Some(beacon(1)));

        // Same winner with different readings is a refresh
        let changed = update(&mut w, &[sample(1, Proximity::Immediate, 0.3, -45)]);
        assert_eq!(changed, None);

        let changed = update(
            &mut w,
            &[sample(1, Proximity::Far, 5.0, -85), sample(2, Proximity::Near, 1.5, -66)],
        );
        assert_eq!(changed, Some(beacon(2)));
    }

    #[test]
    fn test_empty_cycle_keeps_nearest() {
        let mut w = watch();
        update(&mut w, &[sample(1, Proximity::Near, 1.0, -60)]);

        assert_eq!(update(&mut w, &[]), None);
        assert_eq!(w.nearest, Some(beacon(1)));
    }

    #[test]
    fn test_non_matching_samples_are_ignored() {
        let mut w = watch();
        w.identity = BeaconIdentity::parse(UUID, Some(1), Some(5)).unwrap();

        let changed = update(&mut w, &[sample(1, Proximity::Immediate, 0.1, -30)]);
        assert_eq!(changed, None);
        assert!(w.nearest.is_none());

        let changed = update(
            &mut w,
            &[sample(1, Proximity::Immediate, 0.1, -30), sample(5, Proximity::Far, 7.0, -90)],
        );
        assert_eq!(changed, Some(beacon(5)));
    }
}
