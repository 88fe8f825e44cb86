use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::catalog::{VideoStatus, VideoStore};
use crate::config::LocaltubeConfig;

use super::encoder::{EncodeOrchestrator, ProcessRegistry};
use super::error::{TranscodeError, TranscodeResult};
use super::ladder::QualityLadder;
use super::metrics::{MetricsSnapshot, PipelineMetrics};
use super::playlist::{compose_master, write_master};
use super::probe::MediaProber;
use super::types::JobOutcome;

/// Drives one video from PROCESSING to READY or FAILED, persisting every step.
pub struct TranscodePipeline {
    store: Arc<dyn VideoStore>,
    hls_dir: PathBuf,
    prober: MediaProber,
    ladder: QualityLadder,
    orchestrator: EncodeOrchestrator,
    metrics: Arc<PipelineMetrics>,
}

impl std::fmt::Debug for TranscodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodePipeline")
            .field("hls_dir", &self.hls_dir)
            .field("prober", &self.prober)
            .field("ladder", &self.ladder)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

impl TranscodePipeline {
    pub fn new(store: Arc<dyn VideoStore>, config: &LocaltubeConfig) -> Self {
        let transcoding = &config.transcoding;
        Self {
            store,
            hls_dir: config.hls_dir(),
            prober: MediaProber::new(
                transcoding.ffprobe_path.clone(),
                transcoding.probe_timeout(),
            ),
            ladder: QualityLadder::new(&transcoding.profiles()),
            orchestrator: EncodeOrchestrator::new(
                transcoding.ffmpeg_path.clone(),
                transcoding.segment_duration,
                config.encoder.clone(),
            ),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn orchestrator(&self) -> &EncodeOrchestrator {
        &self.orchestrator
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Persists UPLOADING -> PROCESSING before any work is scheduled.
    pub fn begin_processing(&self, video_id: &str) -> TranscodeResult<()> {
        self.store.update_status(video_id, VideoStatus::Processing)?;
        info!(video_id, "video processing");
        Ok(())
    }

    /// Runs the whole job. Fatal errors are absorbed into FAILED; the returned
    /// outcome only reports what happened.
    pub async fn run(&self, video_id: &str, source: &Path) -> JobOutcome {
        match self.process(video_id, source).await {
            Ok(outcome) => {
                self.metrics.job_ready();
                outcome
            }
            Err(err) => {
                error!(video_id, error = %err, "transcoding failed");
                self.fail(video_id, source).await;
                self.metrics.job_failed();
                JobOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn process(&self, video_id: &str, source: &Path) -> TranscodeResult<JobOutcome> {
        let output_dir = self.hls_dir.join(video_id);
        fs::create_dir_all(&output_dir)
            .await
            .map_err(|err| TranscodeError::io(&output_dir, err))?;

        let probe = self.prober.probe(source).await?;
        if probe.degraded {
            warn!(video_id, "probe degraded, planning ladder from fallback resolution");
            self.metrics.probe_degraded();
        }
        let file_size = fs::metadata(source)
            .await
            .map_err(|err| TranscodeError::io(source, err))?
            .len();
        self.store.update_metadata(
            video_id,
            probe.width,
            probe.height,
            probe.duration_seconds,
            file_size,
        )?;

        let plan = self.ladder.plan(&probe);
        info!(
            video_id,
            source_height = probe.height,
            rungs = ?plan.iter().map(|profile| profile.label).collect::<Vec<_>>(),
            "ladder planned"
        );

        // Renditions of one video run one after another.
        let mut produced = Vec::with_capacity(plan.len());
        for profile in &plan {
            let outcome = self
                .orchestrator
                .run_rendition(video_id, source, &output_dir, profile)
                .await;
            self.metrics.rendition_finished(outcome.is_success());
            if outcome.is_success() {
                self.store.add_quality(video_id, profile.label)?;
                produced.push(profile.label.to_string());
            }
        }
        if produced.is_empty() {
            warn!(video_id, planned = plan.len(), "no rendition produced, master playlist is empty");
        }

        let master = compose_master(&plan, &produced);
        write_master(&output_dir, &master).await?;

        self.store.mark_ready(video_id)?;
        remove_source(source).await;
        info!(video_id, renditions = produced.len(), "video ready");
        Ok(JobOutcome::Ready {
            renditions: produced,
            degraded_probe: probe.degraded,
        })
    }

    /// PROCESSING -> FAILED; the source upload is discarded either way.
    pub async fn fail(&self, video_id: &str, source: &Path) {
        if let Err(err) = self.store.update_status(video_id, VideoStatus::Failed) {
            error!(video_id, error = %err, "could not persist failed status");
        } else {
            info!(video_id, "video failed");
        }
        remove_source(source).await;
    }
}

async fn remove_source(source: &Path) {
    match fs::remove_file(source).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %source.display(), error = %err, "failed to delete source upload"),
    }
}

/// Bounded pool of transcoding jobs with an optional per-job deadline.
#[derive(Debug, Clone)]
pub struct TranscodeDispatcher {
    pipeline: Arc<TranscodePipeline>,
    permits: Arc<Semaphore>,
    job_timeout: Option<Duration>,
}

impl TranscodeDispatcher {
    pub fn new(pipeline: TranscodePipeline, max_concurrent_jobs: usize, job_timeout: Option<Duration>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            job_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn VideoStore>, config: &LocaltubeConfig) -> Self {
        Self::new(
            TranscodePipeline::new(store, config),
            config.transcoding.max_concurrent_jobs,
            config.transcoding.job_timeout(),
        )
    }

    /// Marks the video PROCESSING and queues the job. The status change is
    /// persisted before this returns; the job itself runs on a tokio task, so this
    /// must be called from within a runtime.
    pub fn submit(&self, video_id: &str, source: PathBuf) -> TranscodeResult<JobHandle> {
        self.pipeline.begin_processing(video_id)?;
        self.pipeline.metrics.job_submitted();

        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let job_timeout = self.job_timeout;
        let id = video_id.to_string();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return JobOutcome::Failed {
                    reason: "worker pool closed".into(),
                };
            };
            match job_timeout {
                Some(limit) => match timeout(limit, pipeline.run(&id, &source)).await {
                    Ok(outcome) => outcome,
                    Err(_) => pipeline.expire(&id, &source, limit).await,
                },
                None => pipeline.run(&id, &source).await,
            }
        });
        Ok(JobHandle {
            video_id: video_id.to_string(),
            handle,
        })
    }

    pub fn cancel(&self, video_id: &str) -> usize {
        self.pipeline.orchestrator.cancel(video_id)
    }

    pub fn registry(&self) -> Arc<ProcessRegistry> {
        self.pipeline.orchestrator.registry()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pipeline.metrics.snapshot()
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

impl TranscodePipeline {
    async fn expire(&self, video_id: &str, source: &Path, limit: Duration) -> JobOutcome {
        // Dropping the job future already killed its child; this catches anything
        // registered under the id by another job.
        let cancelled = self.orchestrator.cancel(video_id);
        error!(
            video_id,
            error = %TranscodeError::Timeout(limit),
            cancelled,
            "transcoding deadline exceeded"
        );
        self.fail(video_id, source).await;
        self.metrics.job_timed_out();
        JobOutcome::TimedOut
    }
}

/// Awaitable handle on a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    video_id: String,
    handle: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> JobOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) => JobOutcome::Failed {
                reason: format!("job task ended abnormally: {err}"),
            },
        }
    }
}
