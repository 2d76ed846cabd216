//! Capture driver: orchestrates packet ingestion through the adapter,
//! window resolver and rolling aggregator, and persists flushed windows.
//!
//! Three ingestion strategies share one per-event processing path:
//!
//! - **Continuous** (no bound configured): a producer thread reads the live
//!   capture and feeds decoded events through a bounded channel to the
//!   aggregation worker, which flushes closed windows after every add. Runs
//!   until Ctrl+C or the capture stream ends.
//! - **Bounded** (`--duration` or `--max-packets`): the capture is drained
//!   synchronously up to the limit, then the collected events are replayed
//!   through the same path.
//! - **Replay** (`--read`): packets come from a saved PCAP file instead of
//!   a live device, processed exactly as a continuous capture would.
//!
//! Whichever strategy ran, the driver finishes with a terminal drain of
//! every still-open window, so cancellation never loses completed work.

pub mod adapter;
pub mod aggregator;
pub mod config;
pub mod sink;
pub mod types;
pub mod window;

use crate::logger::{Event, SharedLogger};
use crate::pipeline::aggregator::RollingAggregator;
use crate::pipeline::config::{CAPTURE_POLL_MS, CHANNEL_CAPACITY, SNAPLEN};
use crate::pipeline::sink::CsvSink;
use crate::pipeline::types::{FlowRecord, PacketEvent, SharedStats, ShutdownFlag};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use pcap::{Active, Capture};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// Where packets come from.
pub enum CaptureSource {
    /// Live capture; `None` lets libpcap pick the default device.
    Device(Option<String>),
    /// Offline replay from a saved PCAP file.
    File(String),
}

/// How much to capture before switching to drain-and-exit.
#[derive(Debug, Clone, Copy)]
pub enum CaptureLimit {
    /// Capture for this many seconds, then replay and finish.
    DurationSecs(u64),
    /// Capture this many packets, then replay and finish.
    MaxPackets(usize),
    /// Run until cancelled or the stream ends.
    Unbounded,
}

/// Configuration bundle passed from `main` into the pipeline.
pub struct PipelineConfig {
    pub source:      CaptureSource,
    /// BPF filter expression applied to the capture.
    pub bpf_filter:  String,
    /// Aggregation window width in seconds.
    pub window_secs: i64,
    pub limit:       CaptureLimit,
    /// Target CSV artifact path.
    pub output:      PathBuf,
    pub logger:      SharedLogger,
    pub stats:       SharedStats,
    /// Set to `true` by the ctrlc handler; loops exit on next check.
    pub shutdown:    ShutdownFlag,
}

/// Entry point for the aggregation pipeline.
///
/// Opens the sink first so a bad output path fails before any packets are
/// consumed, runs the configured ingestion strategy, then drains every
/// remaining window and closes the sink — on the error path too, so
/// whatever aggregated before the failure is still persisted.
///
/// # Errors
/// Returns a descriptive error if the capture source or the output artifact
/// cannot be opened, or if persisting records fails.
pub fn run_pipeline(cfg: PipelineConfig) -> Result<(), String> {
    let mut sink = CsvSink::open(&cfg.output)?;
    let mut agg = RollingAggregator::new();

    let result = match &cfg.source {
        CaptureSource::File(path) => run_replay(path, &cfg, &mut agg, &mut sink),
        CaptureSource::Device(name) => match cfg.limit {
            CaptureLimit::Unbounded => run_continuous(name.as_deref(), &cfg, &mut agg, &mut sink),
            _ => run_bounded(name.as_deref(), &cfg, &mut agg, &mut sink),
        },
    };

    let drained = agg.flush_all();
    let flushed = persist(&drained, &cfg, &mut sink).and_then(|()| sink.close());

    result.and(flushed)
}

// ── Live capture ──────────────────────────────────────────────────────────────

/// Opens a promiscuous live capture on the requested (or default) device
/// and applies the BPF filter.
///
/// The short read timeout makes the capture loops wake periodically so the
/// shutdown flag is checked even on a quiet link.
fn open_live(name: Option<&str>, cfg: &PipelineConfig) -> Result<Capture<Active>, String> {
    let mut cap = match name {
        Some(name) => Capture::from_device(name)
            .map_err(|e| format!("Cannot open interface '{}': {}", name, e))?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(CAPTURE_POLL_MS)
            .open()
            .map_err(|e| format!("Cannot start capture on '{}': {}", name, e))?,
        None => {
            let dev = pcap::Device::lookup()
                .map_err(|e| format!("pcap device lookup failed: {}", e))?
                .ok_or_else(|| "No capture device found".to_string())?;
            Capture::from_device(dev)
                .map_err(|e| format!("Cannot open default device: {}", e))?
                .promisc(true)
                .snaplen(SNAPLEN)
                .timeout(CAPTURE_POLL_MS)
                .open()
                .map_err(|e| format!("Cannot start capture: {}", e))?
        }
    };

    cap.filter(&cfg.bpf_filter, true)
        .map_err(|e| format!("Invalid capture filter '{}': {}", cfg.bpf_filter, e))?;

    cfg.logger.log(&Event::CaptureStarted {
        source: name.unwrap_or("<default device>"),
        filter: &cfg.bpf_filter,
    });

    Ok(cap)
}

/// Continuous mode: capture and decode on a producer thread, aggregate on
/// this one, with a bounded channel in between for backpressure.
fn run_continuous(
    name: Option<&str>,
    cfg:  &PipelineConfig,
    agg:  &mut RollingAggregator,
    sink: &mut CsvSink,
) -> Result<(), String> {
    let cap = open_live(name, cfg)?;

    let (tx, rx) = bounded::<PacketEvent>(CHANNEL_CAPACITY);
    let shutdown = Arc::clone(&cfg.shutdown);
    let stats = Arc::clone(&cfg.stats);
    let producer = thread::spawn(move || capture_into_channel(cap, tx, shutdown, stats));

    let poll = Duration::from_millis(CAPTURE_POLL_MS as u64);
    loop {
        match rx.recv_timeout(poll) {
            Ok(event) => process_event(event, cfg, agg, sink)?,
            Err(RecvTimeoutError::Timeout) => {
                if cfg.shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
            // Producer exited: capture stream ended or failed.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Process whatever the producer queued before it noticed the shutdown,
    // then wait for it to close the capture handle.
    drain_channel(&rx, cfg, agg, sink)?;
    let _ = producer.join();
    Ok(())
}

/// Producer loop: reads the live capture and pushes decoded events into
/// the channel. `send` blocks once the queue is full, which is the
/// backpressure that keeps a slow sink from growing memory upstream of the
/// aggregator. Exits on shutdown, on a fatal capture error, or when the
/// worker hangs up.
fn capture_into_channel(
    mut cap:  Capture<Active>,
    tx:       Sender<PacketEvent>,
    shutdown: ShutdownFlag,
    stats:    SharedStats,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(packet) => match adapter::from_capture(&packet) {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(_) => {
                    stats.packets_skipped.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(pcap::Error::TimeoutExpired) => continue, // woke up to check shutdown flag
            Err(_) => break,
        }
    }
}

/// Empties any events still queued in the channel through the normal path.
fn drain_channel(
    rx:   &Receiver<PacketEvent>,
    cfg:  &PipelineConfig,
    agg:  &mut RollingAggregator,
    sink: &mut CsvSink,
) -> Result<(), String> {
    while let Ok(event) = rx.try_recv() {
        process_event(event, cfg, agg, sink)?;
    }
    Ok(())
}

/// Bounded mode: drain the capture synchronously up to the configured
/// duration or packet count, then replay the collection through the same
/// per-event path continuous mode uses.
///
/// Ctrl+C during the capture phase is a clean early stop: whatever was
/// already collected is still aggregated and persisted.
fn run_bounded(
    name: Option<&str>,
    cfg:  &PipelineConfig,
    agg:  &mut RollingAggregator,
    sink: &mut CsvSink,
) -> Result<(), String> {
    let mut cap = open_live(name, cfg)?;

    let deadline = match cfg.limit {
        CaptureLimit::DurationSecs(secs) => Some(Instant::now() + Duration::from_secs(secs)),
        _ => None,
    };
    let max_packets = match cfg.limit {
        CaptureLimit::MaxPackets(n) => Some(n),
        _ => None,
    };

    let mut collected: Vec<PacketEvent> = Vec::new();
    while !cfg.shutdown.load(Ordering::Relaxed) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if max_packets.is_some_and(|n| collected.len() >= n) {
            break;
        }
        match cap.next_packet() {
            Ok(packet) => match adapter::from_capture(&packet) {
                Ok(event) => collected.push(event),
                Err(_) => {
                    cfg.stats.packets_skipped.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(_) => break,
        }
    }

    // Close the capture before replaying so the device is released as soon
    // as the bound is hit.
    drop(cap);

    cfg.logger.log(&Event::Info {
        message: &format!("Capture complete: {} packets collected", collected.len()),
    });

    for event in collected {
        process_event(event, cfg, agg, sink)?;
    }
    Ok(())
}

// ── PCAP file replay ──────────────────────────────────────────────────────────

/// Replays every packet in a saved PCAP file through the pipeline.
///
/// Watermark semantics are identical to live capture: window closure is
/// driven by packet timestamps, so replay output is deterministic.
fn run_replay(
    path: &str,
    cfg:  &PipelineConfig,
    agg:  &mut RollingAggregator,
    sink: &mut CsvSink,
) -> Result<(), String> {
    let mut cap = Capture::from_file(path)
        .map_err(|e| format!("Failed to open PCAP file '{}': {}", path, e))?;
    cap.filter(&cfg.bpf_filter, true)
        .map_err(|e| format!("Invalid capture filter '{}': {}", cfg.bpf_filter, e))?;

    cfg.logger.log(&Event::CaptureStarted {
        source: path,
        filter: &cfg.bpf_filter,
    });

    while !cfg.shutdown.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(packet) => match adapter::from_capture(&packet) {
                Ok(event) => process_event(event, cfg, agg, sink)?,
                Err(_) => {
                    cfg.stats.packets_skipped.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(_) => break, // end of file
        }
    }

    Ok(())
}

// ── Shared per-event processing ───────────────────────────────────────────────

/// The single event-processing path used by every ingestion strategy.
///
/// Resolves the event to its flow/window key, folds it into the
/// aggregator, advances the watermark to `timestamp - window`, and
/// persists any windows that closed. Timestamp-less events are counted as
/// skipped and otherwise ignored.
fn process_event(
    event: PacketEvent,
    cfg:   &PipelineConfig,
    agg:   &mut RollingAggregator,
    sink:  &mut CsvSink,
) -> Result<(), String> {
    let Some(ts) = event.timestamp else {
        cfg.stats.packets_skipped.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    };
    let Some(key) = window::resolve(&event, cfg.window_secs) else {
        cfg.stats.packets_skipped.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    };

    cfg.stats.packets_total.fetch_add(1, Ordering::Relaxed);
    cfg.stats
        .bytes_total
        .fetch_add(event.length.max(0) as u64, Ordering::Relaxed);
    agg.add(key, &event);

    let cutoff = ts - chrono::Duration::seconds(cfg.window_secs);
    let closed = agg.flush_before(cutoff);
    persist(&closed, cfg, sink)
}

/// Appends a batch of flushed records to the sink and records the emission.
fn persist(records: &[FlowRecord], cfg: &PipelineConfig, sink: &mut CsvSink) -> Result<(), String> {
    if records.is_empty() {
        return Ok(());
    }
    sink.append(records)?;
    cfg.stats
        .records_written
        .fetch_add(records.len() as u64, Ordering::Relaxed);
    cfg.logger.log(&Event::RecordsFlushed {
        count: records.len(),
    });
    Ok(())
}
