//! Metrics recorder for install operations
//!
//! Records counters and histograms through the `metrics` facade; the host
//! application decides which exporter (if any) to install.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!(
        "installer_chunks_verified_total",
        "Chunks that passed SHA-1 and CRC32 verification"
    );
    describe_counter!(
        "installer_chunk_retries_total",
        "Chunk fetches retried after a network failure or verification mismatch"
    );
    describe_counter!(
        "installer_bytes_downloaded_total",
        "Verified bytes written to disk"
    );
    describe_counter!(
        "installer_files_skipped_total",
        "Files already complete on disk"
    );

    describe_counter!("installer_installs_started_total", "Pipeline runs started");
    describe_counter!(
        "installer_installs_completed_total",
        "Pipeline runs that reached Completed"
    );
    describe_counter!("installer_installs_failed_total", "Pipeline runs that failed");

    describe_gauge!("installer_active_installs", "Pipeline runs in progress");

    describe_histogram!(
        "installer_stage_duration_seconds",
        "Wall-clock time spent in each pipeline stage"
    );
    describe_histogram!("installer_install_duration_seconds", "Total pipeline duration");
}

// ============== Chunk Operations ==============

pub fn record_chunk_verified(bytes: u64) {
    counter!("installer_chunks_verified_total").increment(1);
    counter!("installer_bytes_downloaded_total").increment(bytes);
}

pub fn record_chunk_retry(reason: &'static str) {
    counter!("installer_chunk_retries_total", "reason" => reason).increment(1);
}

pub fn record_file_skipped() {
    counter!("installer_files_skipped_total").increment(1);
}

// ============== Pipeline Operations ==============

pub fn record_stage_duration(stage: &'static str, duration: Duration) {
    histogram!("installer_stage_duration_seconds", "stage" => stage).record(duration.as_secs_f64());
}

/// Tracks one pipeline run from start to a terminal state
pub struct InstallMetrics {
    app_id: String,
    start_time: Instant,
    finished: bool,
}

impl InstallMetrics {
    pub fn start(app_id: u32) -> Self {
        let app_id = app_id.to_string();
        counter!("installer_installs_started_total", "app_id" => app_id.clone()).increment(1);
        gauge!("installer_active_installs").increment(1.0);

        Self {
            app_id,
            start_time: Instant::now(),
            finished: false,
        }
    }

    pub fn complete(mut self) {
        self.finished = true;
        counter!("installer_installs_completed_total", "app_id" => self.app_id.clone()).increment(1);
        gauge!("installer_active_installs").decrement(1.0);
        histogram!("installer_install_duration_seconds").record(self.elapsed().as_secs_f64());
    }

    pub fn fail(mut self, kind: &'static str) {
        self.finished = true;
        counter!(
            "installer_installs_failed_total",
            "app_id" => self.app_id.clone(),
            "kind" => kind
        )
        .increment(1);
        gauge!("installer_active_installs").decrement(1.0);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Drop for InstallMetrics {
    fn drop(&mut self) {
        // A run dropped mid-flight (task aborted) still leaves the gauge balanced
        if !self.finished {
            gauge!("installer_active_installs").decrement(1.0);
        }
    }
}
