use clap::Parser;

/// flowsift — windowed network flow feature extraction to CSV.
///
/// Captures packets from a live interface (or replays a saved PCAP file),
/// aggregates them into per-flow time windows, and appends the derived
/// feature records to an append-only CSV artifact for downstream anomaly
/// scoring.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "flowsift",
    version = "0.2.0",
    about   = "Windowed network flow feature extraction to CSV",
    long_about = None,
)]
pub struct Cli {
    // ── Capture source ───────────────────────────────────────────────────────

    /// Network interface to capture from.
    ///
    /// If omitted, flowsift lets libpcap select the default capture device.
    /// Use `ip link` or `ifconfig` to list available interfaces.
    #[arg(short = 'i', long = "interface", value_name = "IFACE")]
    pub interface: Option<String>,

    /// Read packets from a saved PCAP file instead of a live interface.
    ///
    /// Replay uses the packet timestamps from the file, so window closure
    /// and flushing behave exactly as they would have during live capture
    /// and the output is deterministic.
    #[arg(short = 'r', long = "read", value_name = "FILE", conflicts_with_all = ["duration", "max_packets"])]
    pub pcap_file: Option<String>,

    /// BPF filter expression applied to the capture.
    ///
    /// The default restricts capture to TCP and UDP, matching the
    /// transport-oriented feature set. An invalid expression is a fatal
    /// startup error.
    #[arg(short = 'f', long = "filter", value_name = "EXPR", default_value = "tcp or udp")]
    pub filter: String,

    // ── Capture bounds ───────────────────────────────────────────────────────

    /// Capture for this many seconds, then aggregate and exit.
    ///
    /// Mutually exclusive with --max-packets. When neither bound is given,
    /// flowsift captures continuously until interrupted with Ctrl+C.
    #[arg(short = 'd', long = "duration", value_name = "SECS", conflicts_with = "max_packets")]
    pub duration: Option<u64>,

    /// Capture this many packets, then aggregate and exit.
    ///
    /// Mutually exclusive with --duration.
    #[arg(short = 'c', long = "max-packets", value_name = "N")]
    pub max_packets: Option<usize>,

    // ── Aggregation ──────────────────────────────────────────────────────────

    /// Aggregation window width in seconds.
    ///
    /// Packets sharing a flow 5-tuple are bucketed into windows of this
    /// width; a window is flushed once a packet more than one window past
    /// its start is observed. Default: 30.
    #[arg(
        short = 'w',
        long = "window",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    pub window_secs: i64,

    // ── Output ───────────────────────────────────────────────────────────────

    /// Output CSV file for the aggregated flow records.
    ///
    /// Opened in append mode; the header row is written only when the file
    /// is new or empty, so repeated runs against the same file accumulate
    /// records under a single header. If omitted, a timestamped
    /// `network_traffic_YYYYMMDD_HHMMSS.csv` is created in the current
    /// directory.
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<String>,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Write log output to this file in addition to stdout.
    ///
    /// The file is created if it does not exist and appended to if it does.
    /// JSON mode (--json) affects the format written to this file as well.
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    ///
    /// Each event is a self-contained JSON object on its own line, suitable
    /// for ingestion by log shippers (Logstash, Fluentd, Vector) or SIEM
    /// platforms (Splunk, Elastic, Loki).
    #[arg(short = 'j', long = "json")]
    pub json: bool,
}
