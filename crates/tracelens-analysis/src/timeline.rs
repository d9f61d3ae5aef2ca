//! Binary-search lookups over timestamp-sorted streams.

use std::collections::HashMap;

use tracelens_protocols::{DomSnapshotEvent, Millis};

/// Latest item with `key < ts` (or `key <= ts` when `inclusive`).
pub(crate) fn latest_before<T>(
    items: &[T],
    ts: Millis,
    inclusive: bool,
    key: impl Fn(&T) -> Millis,
) -> Option<&T> {
    let end = items.partition_point(|item| {
        let t = key(item);
        if inclusive { t <= ts } else { t < ts }
    });
    end.checked_sub(1).map(|i| &items[i])
}

/// Earliest item with `after < key < until` (`until` unbounded when `None`).
pub(crate) fn earliest_within<T>(
    items: &[T],
    after: Millis,
    until: Option<Millis>,
    key: impl Fn(&T) -> Millis,
) -> Option<&T> {
    let start = items.partition_point(|item| key(item) <= after);
    items
        .get(start)
        .filter(|item| until.is_none_or(|limit| key(item) < limit))
}

/// DOM snapshots indexed by target for before/after selection.
///
/// Target-matching snapshots win; the whole stream is the fallback.
pub(crate) struct SnapshotIndex<'a> {
    snapshots: &'a [DomSnapshotEvent],
    by_target: HashMap<&'a str, Vec<usize>>,
}

impl<'a> SnapshotIndex<'a> {
    pub fn new(snapshots: &'a [DomSnapshotEvent]) -> Self {
        let mut by_target: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, snapshot) in snapshots.iter().enumerate() {
            if let Some(target) = snapshot.target_ref.as_deref() {
                by_target.entry(target).or_default().push(i);
            }
        }
        Self {
            snapshots,
            by_target,
        }
    }

    fn for_target(&self, target: Option<&str>) -> Option<&[usize]> {
        target.and_then(|t| self.by_target.get(t)).map(Vec::as_slice)
    }

    /// Latest snapshot strictly before `ts`.
    pub fn before(&self, target: Option<&str>, ts: Millis) -> Option<&'a DomSnapshotEvent> {
        let snapshots = self.snapshots;
        self.for_target(target)
            .and_then(|indices| latest_before(indices, ts, false, |&i| snapshots[i].timestamp))
            .map(move |&i| &snapshots[i])
            .or_else(|| latest_before(snapshots, ts, false, |s| s.timestamp))
    }

    /// Earliest snapshot strictly between `ts` and `until`.
    pub fn after(
        &self,
        target: Option<&str>,
        ts: Millis,
        until: Option<Millis>,
    ) -> Option<&'a DomSnapshotEvent> {
        let snapshots = self.snapshots;
        self.for_target(target)
            .and_then(|indices| earliest_within(indices, ts, until, |&i| snapshots[i].timestamp))
            .map(move |&i| &snapshots[i])
            .or_else(|| earliest_within(snapshots, ts, until, |s| s.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshots() -> Vec<DomSnapshotEvent> {
        vec![
            DomSnapshotEvent::new(10.0, Some("#a")),
            DomSnapshotEvent::new(20.0, Some("#b")),
            DomSnapshotEvent::new(30.0, Some("#a")),
            DomSnapshotEvent::new(40.0, Some("#b")),
        ]
    }

    #[test]
    fn test_latest_before() {
        let values = [1.0, 2.0, 2.0, 3.0];
        assert_eq!(latest_before(&values, 2.0, false, |v| *v), Some(&1.0));
        assert_eq!(latest_before(&values, 2.0, true, |v| *v), Some(&2.0));
        assert_eq!(latest_before(&values, 0.5, true, |v| *v), None);
    }

    #[test]
    fn test_earliest_within() {
        let values = [1.0, 2.0, 3.0];
        assert_eq!(earliest_within(&values, 1.0, None, |v| *v), Some(&2.0));
        assert_eq!(earliest_within(&values, 1.0, Some(2.0), |v| *v), None);
        assert_eq!(earliest_within(&values, 3.0, None, |v| *v), None);
    }

    #[test]
    fn test_snapshot_index_prefers_target() {
        let snapshots = snapshots();
        let index = SnapshotIndex::new(&snapshots);

        let before = index.before(Some("#a"), 35.0).unwrap();
        assert_eq!(before.timestamp, 30.0);
        let before = index.before(Some("#b"), 35.0).unwrap();
        assert_eq!(before.timestamp, 20.0);

        let after = index.after(Some("#a"), 15.0, None).unwrap();
        assert_eq!(after.timestamp, 30.0);
    }

    #[test]
    fn test_snapshot_index_falls_back_to_any_target() {
        let snapshots = snapshots();
        let index = SnapshotIndex::new(&snapshots);

        let before = index.before(Some("#missing"), 25.0).unwrap();
        assert_eq!(before.timestamp, 20.0);
        let before = index.before(None, 25.0).unwrap();
        assert_eq!(before.timestamp, 20.0);

        // Target "#a" has no snapshot before 5, nor does anything else.
        assert!(index.before(Some("#a"), 5.0).is_none());
    }

    #[test]
    fn test_snapshot_index_after_respects_window() {
        let snapshots = snapshots();
        let index = SnapshotIndex::new(&snapshots);

        // The matching target's next snapshot lies beyond the window; fall back to any target.
        let after = index.after(Some("#a"), 15.0, Some(25.0)).unwrap();
        assert_eq!(after.timestamp, 20.0);
        assert!(index.after(Some("#a"), 40.0, None).is_none());
    }
}
