//! Rolling window aggregation engine.
//!
//! Maintains one [`AggregationState`] per live [`FlowWindowKey`] and turns
//! completed buckets into [`FlowRecord`]s. Flushing is watermark-driven, not
//! timer-driven: a window is only known to be closed once an event past its
//! end (or end-of-input) has been observed, which keeps the engine free of
//! wall-clock dependence and deterministic under replay.
//!
//! The map is confined to the single aggregation worker; nothing else may
//! mutate an [`AggregationState`], so no locking is needed here.

use crate::pipeline::types::{AggregationState, FlowRecord, FlowWindowKey, PacketEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Keyed rolling aggregation state, unbounded except by active flushing.
///
/// Memory grows with the number of live flow/window buckets between
/// watermarks; the window width bounds staleness, not map size. This is the
/// deliberate memory/latency trade-off of the watermark design.
#[derive(Default)]
pub struct RollingAggregator {
    buckets: HashMap<FlowWindowKey, AggregationState>,
}

impl RollingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the bucket identified by `key`.
    ///
    /// Creates the state on first sight of the key, otherwise extends the
    /// running min/max timestamps and totals in place. Negative lengths
    /// (malformed capture metadata) are clamped to zero before summing.
    ///
    /// The caller resolved `key` from `event`, so the event is guaranteed
    /// to carry a timestamp; events without one never reach this point.
    pub fn add(&mut self, key: FlowWindowKey, event: &PacketEvent) {
        let Some(ts) = event.timestamp else { return };
        let length = event.length.max(0) as u64;

        match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                if ts < state.first_seen {
                    state.first_seen = ts;
                }
                if ts > state.last_seen {
                    state.last_seen = ts;
                }
                state.byte_sum += length;
                state.packet_count += 1;
            }
            Entry::Vacant(vacant) => {
                let key = vacant.key();
                let state = AggregationState {
                    first_seen:   ts,
                    last_seen:    ts,
                    byte_sum:     length,
                    packet_count: 1,
                    src_port:     key.src_port,
                    dst_port:     key.dst_port,
                    protocol:     key.protocol.clone(),
                };
                vacant.insert(state);
            }
        }
    }

    /// Emits and removes every bucket whose window started before `cutoff`.
    ///
    /// Emission order across keys is unspecified; within a single key only
    /// one record is ever emitted. Ownership of each flushed state moves
    /// into the returned record; the aggregator keeps nothing.
    pub fn flush_before(&mut self, cutoff: DateTime<Utc>) -> Vec<FlowRecord> {
        let expired: Vec<FlowWindowKey> = self
            .buckets
            .keys()
            .filter(|key| key.window_start < cutoff)
            .cloned()
            .collect();

        expired
            .into_iter()
            .filter_map(|key| {
                self.buckets
                    .remove(&key)
                    .map(|state| make_record(key.window_start, state))
            })
            .collect()
    }

    /// Drains every remaining bucket regardless of window.
    ///
    /// Used at end-of-stream and on cancellation so partially filled
    /// windows are still persisted. Equivalent to `flush_before` with an
    /// infinite cutoff.
    pub fn flush_all(&mut self) -> Vec<FlowRecord> {
        self.buckets
            .drain()
            .map(|(key, state)| make_record(key.window_start, state))
            .collect()
    }

    /// Number of buckets currently held open.
    pub fn open_windows(&self) -> usize {
        self.buckets.len()
    }
}

/// Derives the emitted feature row from a completed bucket.
///
/// The duration is floored to 1.0 s: it avoids a zero divisor for the rate
/// features and an implausibly small span for single-packet windows.
fn make_record(window_start: DateTime<Utc>, state: AggregationState) -> FlowRecord {
    let span_secs = (state.last_seen - state.first_seen).num_milliseconds() as f64 / 1000.0;
    let duration = span_secs.max(1.0);
    let bytes = state.byte_sum;
    let packets = state.packet_count;

    FlowRecord {
        timestamp:           window_start.to_rfc3339_opts(SecondsFormat::Secs, true),
        bytes_transferred:   bytes,
        packet_count:        packets,
        connection_duration: duration,
        source_port:         state.src_port,
        destination_port:    state.dst_port,
        retransmission_rate: 0.0,
        protocol:            state.protocol,
        bytes_per_packet:    bytes as f64 / packets as f64,
        packets_per_second:  packets as f64 / duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::window::resolve;
    use chrono::{Duration, TimeZone};

    const WINDOW: i64 = 30;

    fn event(ts: DateTime<Utc>, length: i64) -> PacketEvent {
        PacketEvent {
            timestamp: Some(ts),
            src_ip:    "192.168.1.10".to_string(),
            dst_ip:    "93.184.216.34".to_string(),
            src_port:  Some(1000),
            dst_port:  Some(80),
            protocol:  "TCP".to_string(),
            length,
        }
    }

    fn add(agg: &mut RollingAggregator, ev: &PacketEvent) {
        let key = resolve(ev, WINDOW).expect("event has a timestamp");
        agg.add(key, ev);
    }

    fn base() -> DateTime<Utc> {
        // Multiple of 30 so the window starts exactly here.
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn three_packets_in_one_window_aggregate_into_one_record() {
        let mut agg = RollingAggregator::new();
        let t = base();
        add(&mut agg, &event(t, 100));
        add(&mut agg, &event(t + Duration::seconds(5), 200));
        add(&mut agg, &event(t + Duration::seconds(10), 50));

        let records = agg.flush_all();
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.packet_count, 3);
        assert_eq!(r.bytes_transferred, 350);
        assert_eq!(r.connection_duration, 10.0);
        assert!((r.bytes_per_packet - 350.0 / 3.0).abs() < 1e-9);
        assert!((r.packets_per_second - 0.3).abs() < 1e-9);
        assert_eq!(r.retransmission_rate, 0.0);
    }

    #[test]
    fn single_packet_window_gets_floored_duration() {
        let mut agg = RollingAggregator::new();
        add(&mut agg, &event(base(), 64));

        let records = agg.flush_all();
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.connection_duration, 1.0);
        assert_eq!(r.packets_per_second, 1.0);
        assert_eq!(r.bytes_per_packet, 64.0);
    }

    #[test]
    fn negative_length_is_clamped_to_zero() {
        let mut agg = RollingAggregator::new();
        add(&mut agg, &event(base(), -5));
        add(&mut agg, &event(base() + Duration::seconds(1), 10));

        let records = agg.flush_all();
        assert_eq!(records[0].bytes_transferred, 10);
        assert_eq!(records[0].packet_count, 2);
    }

    #[test]
    fn watermark_flush_leaves_the_open_window_behind() {
        let mut agg = RollingAggregator::new();
        let t = base();
        for offset in [0, 10, 20, 35] {
            add(&mut agg, &event(t + Duration::seconds(offset), 100));
        }
        assert_eq!(agg.open_windows(), 2);

        // Watermark from the t+35 arrival: cutoff = ts - window.
        let cutoff = t + Duration::seconds(35) - Duration::seconds(WINDOW);
        let flushed = agg.flush_before(cutoff);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].packet_count, 3);
        assert_eq!(agg.open_windows(), 1);

        let rest = agg.flush_all();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].packet_count, 1);
        assert_eq!(agg.open_windows(), 0);
    }

    #[test]
    fn later_watermark_never_re_emits_a_flushed_key() {
        let mut agg = RollingAggregator::new();
        let t = base();
        add(&mut agg, &event(t, 100));

        let first = agg.flush_before(t + Duration::seconds(60));
        assert_eq!(first.len(), 1);

        let second = agg.flush_before(t + Duration::seconds(120));
        assert!(second.is_empty());
    }

    #[test]
    fn flush_all_drains_every_pending_window() {
        let mut agg = RollingAggregator::new();
        let t = base();
        add(&mut agg, &event(t, 100));
        add(&mut agg, &event(t + Duration::seconds(45), 100));
        assert_eq!(agg.open_windows(), 2);

        let records = agg.flush_all();
        assert_eq!(records.len(), 2);
        assert_eq!(agg.open_windows(), 0);
        assert!(agg.flush_all().is_empty());
    }

    #[test]
    fn distinct_five_tuples_keep_separate_buckets() {
        let mut agg = RollingAggregator::new();
        let t = base();
        let a = event(t, 100);
        let mut b = event(t, 100);
        b.dst_port = Some(443);

        add(&mut agg, &a);
        add(&mut agg, &b);
        assert_eq!(agg.open_windows(), 2);
    }

    #[test]
    fn out_of_order_arrival_extends_the_running_min() {
        let mut agg = RollingAggregator::new();
        let t = base();
        add(&mut agg, &event(t + Duration::seconds(10), 100));
        add(&mut agg, &event(t + Duration::seconds(2), 100));

        let records = agg.flush_all();
        assert_eq!(records[0].connection_duration, 8.0);
    }

    #[test]
    fn record_timestamp_is_the_iso_window_start() {
        let mut agg = RollingAggregator::new();
        add(&mut agg, &event(base() + Duration::seconds(17), 100));

        let records = agg.flush_all();
        assert_eq!(records[0].timestamp, "2025-03-01T12:00:00Z");
    }
}
