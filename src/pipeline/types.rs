use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, atomic::AtomicBool};

/// Shared flag set by the Ctrl+C handler; capture loops exit on next check.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Canonical decoded form of one observed packet.
///
/// Produced by the adapter from a raw capture frame and passed by value
/// through the resolver into the aggregator. Every field is best-effort:
/// addresses may be empty, ports absent for non-TCP/UDP traffic, and the
/// timestamp absent when the capture header carries an unrepresentable
/// time. An absent timestamp causes the event to be dropped before any
/// aggregation state is created.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub timestamp: Option<DateTime<Utc>>,
    pub src_ip:    String,
    pub dst_ip:    String,
    pub src_port:  Option<u16>,
    pub dst_port:  Option<u16>,
    /// Best available protocol label (transport layer preferred, falling
    /// back to the network layer when no transport header was decoded).
    pub protocol:  String,
    /// On-wire byte length. Kept signed so the aggregator's clamp-to-zero
    /// contract is explicit rather than assumed from the capture layer.
    pub length:    i64,
}

/// Why the adapter refused to turn a captured frame into a [`PacketEvent`].
///
/// Skips are per-packet and recoverable: the driver counts them and moves
/// on, never aborting the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The link-layer frame could not be sliced at all.
    MalformedFrame,
}

/// Identity of one aggregation bucket: a flow 5-tuple plus the start of the
/// time window its packets fall into.
///
/// Two events with the same 5-tuple and timestamps inside
/// `[window_start, window_start + window_secs)` map to the same key.
/// Immutable once constructed.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct FlowWindowKey {
    pub src_ip:       String,
    pub src_port:     Option<u16>,
    pub dst_ip:       String,
    pub dst_port:     Option<u16>,
    pub protocol:     String,
    pub window_start: DateTime<Utc>,
}

/// Running per-bucket statistics, owned exclusively by the aggregator.
///
/// Created on the first event for a key, mutated on every subsequent event
/// for that key, and removed exactly when the bucket is flushed. For any
/// state that exists, `packet_count >= 1` and `first_seen <= last_seen`.
pub struct AggregationState {
    /// Earliest event timestamp seen in this bucket (running min).
    pub first_seen:   DateTime<Utc>,

    /// Latest event timestamp seen in this bucket (running max).
    pub last_seen:    DateTime<Utc>,

    /// Total clamped byte count across all packets in the bucket.
    pub byte_sum:     u64,

    /// Number of packets folded into this bucket.
    pub packet_count: u64,

    /// Ports and protocol are denormalized from the key so a flushed record
    /// can be emitted without carrying the key around.
    pub src_port:     Option<u16>,
    pub dst_port:     Option<u16>,
    pub protocol:     String,
}

/// One emitted per-window flow feature row.
///
/// Field order here is the CSV column order; the sink serializes records
/// positionally against [`crate::pipeline::sink::HEADER`].
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    /// ISO-8601 window start.
    pub timestamp:           String,
    pub bytes_transferred:   u64,
    pub packet_count:        u64,
    /// Window span in seconds, floored to 1.0 so single-packet windows
    /// never produce a zero divisor downstream.
    pub connection_duration: f64,
    pub source_port:         Option<u16>,
    pub destination_port:    Option<u16>,
    /// Constant placeholder: no lower-layer retransmission signal is
    /// available at this aggregation level.
    pub retransmission_rate: f64,
    pub protocol:            String,
    pub bytes_per_packet:    f64,
    pub packets_per_second:  f64,
}

/// Session-wide counters shared across the capture and aggregation threads.
///
/// All fields are atomics so the producer thread can count skips while the
/// worker counts processed packets without locking.
#[derive(Default)]
pub struct SessionStats {
    /// Packets successfully folded into an aggregation bucket.
    pub packets_total:   AtomicU64,

    /// Packets dropped at the adapter/resolver boundary (malformed frame or
    /// missing timestamp).
    pub packets_skipped: AtomicU64,

    /// Clamped bytes accumulated across all buckets.
    pub bytes_total:     AtomicU64,

    /// Flow records appended to the output artifact.
    pub records_written: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub type SharedStats = Arc<SessionStats>;
