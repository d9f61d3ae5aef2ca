//! Timestamp parsing and timeline checks.

use chrono::DateTime;

use tracelens_protocols::{LoadError, Millis, TraceEvent};

use crate::manifest::RawTimestamp;

/// Convert a recorded timestamp into milliseconds.
pub(crate) fn to_millis(raw: &RawTimestamp) -> Result<Millis, LoadError> {
    let millis = match raw {
        RawTimestamp::Millis(ms) => *ms,
        RawTimestamp::Text(text) => {
            let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                LoadError::malformed(format!("invalid timestamp '{}': {}", text, e))
            })?;
            parsed.timestamp_micros() as f64 / 1000.0
        }
    };

    if !millis.is_finite() {
        return Err(LoadError::malformed(format!(
            "non-finite timestamp {:?}",
            raw
        )));
    }
    Ok(millis)
}

/// Convert an optional timestamp.
pub(crate) fn to_millis_opt(raw: Option<&RawTimestamp>) -> Result<Option<Millis>, LoadError> {
    raw.map(to_millis).transpose()
}

/// Fail when `timestamps` ever decreases. `source` names the offending stream.
pub(crate) fn ensure_non_decreasing(
    source: &str,
    timestamps: impl IntoIterator<Item = Millis>,
) -> Result<(), LoadError> {
    let mut previous: Option<Millis> = None;
    for (index, ts) in timestamps.into_iter().enumerate() {
        if let Some(prev) = previous {
            if ts < prev {
                return Err(LoadError::malformed(format!(
                    "{} out of order at record {}: {} < {}",
                    source, index, ts, prev
                )));
            }
        }
        previous = Some(ts);
    }
    Ok(())
}

/// Shift every event so that the earliest timestamp becomes zero.
pub(crate) fn rebase(events: &mut [TraceEvent]) {
    let origin = events
        .iter()
        .map(TraceEvent::timestamp)
        .min_by(|a, b| a.total_cmp(b));
    if let Some(origin) = origin {
        for event in events.iter_mut() {
            event.rebase(origin);
        }
    }
}
