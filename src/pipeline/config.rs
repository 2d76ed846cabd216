/// Width of the aggregation window, in seconds, when not overridden on the CLI.
///
/// 30 seconds matches the granularity the downstream anomaly scorer was
/// trained against: wide enough that short flows produce a single record,
/// narrow enough that a long-lived flow yields a usable time series.
pub const DEFAULT_WINDOW_SECS: i64 = 30;

/// Default BPF filter applied to live captures.
///
/// The feature set is transport-oriented (ports, byte/packet rates), so by
/// default only TCP and UDP traffic is captured. Override with `--filter`
/// to widen or narrow the capture.
pub const DEFAULT_BPF_FILTER: &str = "tcp or udp";

/// Capacity of the bounded channel between the capture thread and the
/// aggregation worker.
///
/// The bound provides backpressure: if the sink stalls, the capture thread
/// blocks on `send` once the queue fills rather than buffering packets
/// without limit. 1024 events absorbs normal burstiness on a busy link.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Read timeout for live pcap captures, in milliseconds.
///
/// The capture loop wakes at least this often even when no packets arrive,
/// so the shutdown flag is noticed promptly after Ctrl+C.
pub const CAPTURE_POLL_MS: i32 = 200;

/// Bytes captured per packet.
///
/// Aggregation only needs headers plus the on-wire length from the capture
/// header, so a modest snap length keeps kernel buffer pressure low.
pub const SNAPLEN: i32 = 2048;
