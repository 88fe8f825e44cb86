use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide counters for the transcoding pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    jobs_submitted: AtomicU64,
    jobs_ready: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_timed_out: AtomicU64,
    renditions_succeeded: AtomicU64,
    renditions_failed: AtomicU64,
    probes_degraded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_ready: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub renditions_succeeded: u64,
    pub renditions_failed: u64,
    pub probes_degraded: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_ready(&self) {
        self.jobs_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_timed_out(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rendition_finished(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.renditions_succeeded
        } else {
            &self.renditions_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn probe_degraded(&self) {
        self.probes_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_ready: self.jobs_ready.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            renditions_succeeded: self.renditions_succeeded.load(Ordering::Relaxed),
            renditions_failed: self.renditions_failed.load(Ordering::Relaxed),
            probes_degraded: self.probes_degraded.load(Ordering::Relaxed),
        }
    }
}
