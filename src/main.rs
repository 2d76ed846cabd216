mod cli;
mod logger;
mod pipeline;

use cli::Cli;
use clap::Parser;
use logger::{Event, Logger};
use pipeline::types::{SessionStats, ShutdownFlag};
use pipeline::{CaptureLimit, CaptureSource, PipelineConfig, run_pipeline};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() -> ExitCode {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize shutdown flag for graceful termination
    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = Arc::clone(&shutdown);

    // Track session duration for summary reporting
    let session_start = Instant::now();

    // Initialize logger with optional JSON output and file logging
    let logger = match Logger::new(cli.json, cli.log_file.as_deref()) {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            eprintln!("Failed to open log file: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Create session statistics tracker
    let stats = SessionStats::new();

    register_shutdown_handler(shutdown_ctrlc);

    // ── Pipeline configuration ────────────────────────────────────────────────

    let source = match &cli.pcap_file {
        Some(path) => {
            logger.log(&Event::Info {
                message: "Replay mode: reading from PCAP file",
            });
            CaptureSource::File(path.clone())
        }
        None => CaptureSource::Device(cli.interface.clone()),
    };

    let limit = match (cli.duration, cli.max_packets) {
        (Some(secs), _) => CaptureLimit::DurationSecs(secs),
        (_, Some(count)) => CaptureLimit::MaxPackets(count),
        (None, None) => CaptureLimit::Unbounded,
    };

    let output = resolve_output_path(cli.output.as_deref());
    logger.log(&Event::Info {
        message: &format!("Writing flow records to {}", output.display()),
    });

    let cfg = PipelineConfig {
        source,
        bpf_filter:  cli.filter.clone(),
        window_secs: cli.window_secs,
        limit,
        output,
        logger:      Arc::clone(&logger),
        stats:       Arc::clone(&stats),
        shutdown:    Arc::clone(&shutdown),
    };

    let result = run_pipeline(cfg);

    print_summary(&logger, &stats, session_start);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.log(&Event::Info {
                message: &format!("Pipeline error: {}", e),
            });
            ExitCode::FAILURE
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Registers a signal handler for graceful shutdown on Ctrl+C.
///
/// Interruption is not an error: capture loops notice the flag, the
/// terminal drain still runs, and completed windows are persisted.
fn register_shutdown_handler(shutdown: ShutdownFlag) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\n[!] Ctrl+C received — flushing and shutting down...");
        shutdown.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Failed to register Ctrl+C handler: {}", e);
    }
}

/// Picks the output path: the user's choice, or a timestamped filename in
/// the current directory when none was given.
fn resolve_output_path(output: Option<&str>) -> PathBuf {
    match output {
        Some(path) => PathBuf::from(path),
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            PathBuf::from(format!("network_traffic_{}.csv", stamp))
        }
    }
}

/// Prints session summary statistics on shutdown.
fn print_summary(
    logger:        &Arc<Logger>,
    stats:         &Arc<SessionStats>,
    session_start: Instant,
) {
    logger.log(&Event::SessionSummary {
        duration_secs:   session_start.elapsed().as_secs(),
        packets_total:   stats.packets_total.load(Ordering::Relaxed),
        packets_skipped: stats.packets_skipped.load(Ordering::Relaxed),
        bytes_total:     stats.bytes_total.load(Ordering::Relaxed),
        records_written: stats.records_written.load(Ordering::Relaxed),
    });
}
