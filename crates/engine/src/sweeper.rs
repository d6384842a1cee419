//! Background expiry sweep: the engine's only thread.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::reservations::{CleanupReport, ReservationManager};

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub passes: u64,
    pub reservations_expired: u64,
    pub reservations_failed: u64,
    pub passes_skipped: u64,
    pub passes_errored: u64,
}

impl SweepStats {
    fn record(&mut self, report: &CleanupReport) {
        self.passes += 1;
        if report.skipped_in_flight {
            self.passes_skipped += 1;
        }
        self.reservations_expired += report.cleaned as u64;
        self.reservations_failed += report.failed as u64;
    }
}

/// Handle to control and join the sweeper thread.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweepStats>>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the current pass to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> SweepStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Debug)]
pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Spawn a thread that calls `cleanup_expired` every `interval`.
    pub fn spawn(
        manager: Arc<ReservationManager>,
        interval: Duration,
    ) -> std::io::Result<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweepStats::default()));
        let worker_stats = stats.clone();

        let join = thread::Builder::new()
            .name("stockpilot-expiry-sweeper".to_string())
            .spawn(move || sweep_loop(&manager, interval, &shutdown_rx, &worker_stats))?;

        info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");
        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweep_loop(
    manager: &ReservationManager,
    interval: Duration,
    shutdown_rx: &mpsc::Receiver<()>,
    stats: &Mutex<SweepStats>,
) {
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let started = Instant::now();
        let outcome = manager.cleanup_expired();
        let mut stats = match stats.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        match outcome {
            Ok(report) => {
                stats.record(&report);
                debug!(
                    cleaned = report.cleaned,
                    failed = report.failed,
                    skipped = report.skipped_in_flight,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "expiry sweep pass"
                );
            }
            Err(err) => {
                stats.passes += 1;
                stats.passes_errored += 1;
                error!(error = %err, "expiry sweep pass failed");
            }
        }
    }
    info!("expiry sweeper stopped");
}
