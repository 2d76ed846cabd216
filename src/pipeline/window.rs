//! Window key resolution: maps a decoded packet event onto the aggregation
//! bucket identity for its flow and time window.
//!
//! The window start is the event's epoch second floored to the nearest
//! multiple of the window width. Floor division (`div_euclid`) keeps the
//! bucketing correct for pre-epoch timestamps, which occasionally appear in
//! corrupted PCAP files. If the floored epoch cannot be converted back into
//! a timestamp, resolution degrades to truncating the event time to the
//! start of its containing minute rather than failing.

use crate::pipeline::types::{FlowWindowKey, PacketEvent};
use chrono::{DateTime, TimeZone, Timelike, Utc};

/// Resolves an event to its flow/window bucket key.
///
/// Returns `None` when the event carries no timestamp; such events are
/// dropped before any aggregation state is created.
///
/// # Arguments
/// * `event`       - Decoded packet event.
/// * `window_secs` - Window width in seconds (must be positive).
pub fn resolve(event: &PacketEvent, window_secs: i64) -> Option<FlowWindowKey> {
    let ts = event.timestamp?;

    Some(FlowWindowKey {
        src_ip:       event.src_ip.clone(),
        src_port:     event.src_port,
        dst_ip:       event.dst_ip.clone(),
        dst_port:     event.dst_port,
        protocol:     event.protocol.clone(),
        window_start: window_start(ts, window_secs),
    })
}

/// Floors a timestamp to the start of its aggregation window.
///
/// Falls back to minute truncation when the floored epoch second is outside
/// the representable timestamp range.
pub fn window_start(ts: DateTime<Utc>, window_secs: i64) -> DateTime<Utc> {
    let floored = ts.timestamp().div_euclid(window_secs) * window_secs;

    match Utc.timestamp_opt(floored, 0).single() {
        Some(start) => start,
        None => truncate_to_minute(ts),
    }
}

/// Zeroes the seconds and sub-second component of a timestamp.
///
/// Only used as the degraded path when window arithmetic fails; the
/// unmodified timestamp is returned in the (unreachable for valid
/// timestamps) case where truncation itself is rejected.
fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(ts: Option<DateTime<Utc>>) -> PacketEvent {
        PacketEvent {
            timestamp: ts,
            src_ip:    "10.0.0.1".to_string(),
            dst_ip:    "10.0.0.2".to_string(),
            src_port:  Some(1000),
            dst_port:  Some(80),
            protocol:  "TCP".to_string(),
            length:    64,
        }
    }

    #[test]
    fn events_in_same_window_share_a_start() {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 1).unwrap();
        let later = base + chrono::Duration::seconds(25);

        let k1 = resolve(&event_at(Some(base)), 30).unwrap();
        let k2 = resolve(&event_at(Some(later)), 30).unwrap();
        assert_eq!(k1.window_start, k2.window_start);
        assert_eq!(k1, k2);
    }

    #[test]
    fn window_start_floors_to_multiple_of_width() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 59).unwrap();
        let start = window_start(ts, 30);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap());
        assert_eq!(start.timestamp() % 30, 0);
    }

    #[test]
    fn boundary_timestamp_opens_a_new_window() {
        let end_of_first = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 29).unwrap();
        let start_of_next = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap();
        assert_ne!(window_start(end_of_first, 30), window_start(start_of_next, 30));
    }

    #[test]
    fn pre_epoch_timestamps_floor_downward() {
        let ts = Utc.timestamp_opt(-5, 0).unwrap();
        assert_eq!(window_start(ts, 30).timestamp(), -30);
    }

    #[test]
    fn missing_timestamp_yields_no_key() {
        assert!(resolve(&event_at(None), 30).is_none());
    }

    #[test]
    fn minute_truncation_zeroes_seconds() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 7, 44).unwrap()
            + chrono::Duration::milliseconds(250);
        let truncated = truncate_to_minute(ts);
        assert_eq!(truncated, Utc.with_ymd_and_hms(2025, 3, 1, 12, 7, 0).unwrap());
    }
}
