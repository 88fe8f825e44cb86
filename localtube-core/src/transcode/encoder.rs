use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::catalog::QualityProfile;
use crate::config::EncoderSection;

use super::playlist::{RENDITION_PLAYLIST_NAME, SEGMENT_PATTERN};
use super::types::{ProcessKey, RenditionOutcome};

/// Live encoder invocations, each reachable through a cancellation message.
///
/// The worker that spawned a process keeps sole ownership of its child; `cancel`
/// only delivers a message and the worker kills its own process.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    next_token: AtomicU64,
    entries: Mutex<HashMap<u64, RegisteredProcess>>,
}

#[derive(Debug)]
struct RegisteredProcess {
    key: ProcessKey,
    cancel: oneshot::Sender<()>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, key: ProcessKey) -> (Registration, oneshot::Receiver<()>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(
            token,
            RegisteredProcess {
                key,
                cancel: sender,
            },
        );
        let registration = Registration {
            registry: Arc::clone(self),
            token,
        };
        (registration, receiver)
    }

    /// Signals every process registered for `video_id`. Returns how many were signalled;
    /// repeating the call once they are gone returns zero.
    pub fn cancel(&self, video_id: &str) -> usize {
        let cancelled: Vec<RegisteredProcess> = {
            let mut entries = self.lock();
            let tokens: Vec<u64> = entries
                .iter()
                .filter(|(_, entry)| entry.key.video_id == video_id)
                .map(|(token, _)| *token)
                .collect();
            tokens
                .into_iter()
                .filter_map(|token| entries.remove(&token))
                .collect()
        };
        for entry in &cancelled {
            info!(process = %entry.key, "cancelling encoder process");
        }
        let count = cancelled.len();
        for entry in cancelled {
            // The worker may already have exited; a closed channel is fine.
            let _ = entry.cancel.send(());
        }
        count
    }

    pub fn active(&self) -> Vec<ProcessKey> {
        let mut keys: Vec<ProcessKey> = self
            .lock()
            .values()
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort_by(|left, right| {
            (&left.video_id, &left.label).cmp(&(&right.video_id, &right.label))
        });
        keys
    }

    pub fn is_active(&self, video_id: &str) -> bool {
        self.lock()
            .values()
            .any(|entry| entry.key.video_id == video_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, token: u64) {
        self.lock().remove(&token);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, RegisteredProcess>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its registry entry when dropped, including when the owning job is
/// abandoned mid-run.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ProcessRegistry>,
    token: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.token);
    }
}

/// Runs one ffmpeg invocation per rendition.
#[derive(Debug, Clone)]
pub struct EncodeOrchestrator {
    program: PathBuf,
    segment_duration: u32,
    settings: EncoderSection,
    registry: Arc<ProcessRegistry>,
}

impl EncodeOrchestrator {
    pub fn new(program: impl Into<PathBuf>, segment_duration: u32, settings: EncoderSection) -> Self {
        Self {
            program: program.into(),
            segment_duration,
            settings,
            registry: Arc::new(ProcessRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<ProcessRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn cancel(&self, video_id: &str) -> usize {
        self.registry.cancel(video_id)
    }

    /// Scale-and-pad to the exact rung size, then cut fixed-length VOD segments.
    pub fn build_args(
        &self,
        source: &Path,
        rendition_dir: &Path,
        profile: &QualityProfile,
    ) -> Vec<String> {
        let (width, height) = (profile.width, profile.height);
        let settings = &self.settings;
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-nostats".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-i".into(),
            source.to_string_lossy().to_string(),
            "-vf".into(),
            format!(
                "scale={width}:{height}:force_original_aspect_ratio=decrease,\
                 pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
            ),
            "-c:v".into(),
            settings.video_codec.clone(),
            "-preset".into(),
            settings.preset.clone(),
            "-crf".into(),
            settings.crf.to_string(),
            "-profile:v".into(),
            settings.profile.clone(),
            "-level".into(),
            settings.level.clone(),
            "-pix_fmt".into(),
            settings.pix_fmt.clone(),
            "-c:a".into(),
            settings.audio_codec.clone(),
            "-b:a".into(),
            settings.audio_bitrate.clone(),
            "-ar".into(),
            settings.audio_sample_rate.to_string(),
            "-movflags".into(),
            "+faststart".into(),
            "-hls_time".into(),
            self.segment_duration.to_string(),
            "-hls_playlist_type".into(),
            "vod".into(),
            "-hls_flags".into(),
            "independent_segments".into(),
            "-hls_segment_filename".into(),
            rendition_dir
                .join(SEGMENT_PATTERN)
                .to_string_lossy()
                .to_string(),
            rendition_dir
                .join(RENDITION_PLAYLIST_NAME)
                .to_string_lossy()
                .to_string(),
        ]
    }

    /// Produces `output_dir/<label>/`. Anything but a zero exit code removes that
    /// directory and reports the rendition as not produced.
    pub async fn run_rendition(
        &self,
        video_id: &str,
        source: &Path,
        output_dir: &Path,
        profile: &QualityProfile,
    ) -> RenditionOutcome {
        let rendition_dir = output_dir.join(profile.label);
        let key = ProcessKey::new(video_id, profile.label);
        if let Err(err) = fs::create_dir_all(&rendition_dir).await {
            warn!(process = %key, path = %rendition_dir.display(), error = %err, "cannot create rendition directory");
            return RenditionOutcome::Failed { exit_code: None };
        }

        // Also fires when the job future is dropped mid-encode by its deadline.
        let partial = PartialRendition::new(&rendition_dir);

        info!(process = %key, resolution = %profile.resolution(), "encoding rendition");
        let outcome = match self.encode(&key, source, &rendition_dir, profile).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(process = %key, program = %self.program.display(), error = %err, "encoder could not run");
                RenditionOutcome::Failed { exit_code: None }
            }
        };

        match outcome {
            RenditionOutcome::Succeeded => {
                partial.keep();
                info!(process = %key, "rendition produced");
            }
            RenditionOutcome::Failed { exit_code } => {
                warn!(process = %key, exit_code, "encoder failed, dropping rendition");
            }
            RenditionOutcome::Cancelled => {
                warn!(process = %key, "encoder cancelled, dropping rendition");
            }
        }
        outcome
    }

    async fn encode(
        &self,
        key: &ProcessKey,
        source: &Path,
        rendition_dir: &Path,
        profile: &QualityProfile,
    ) -> io::Result<RenditionOutcome> {
        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .args(self.build_args(source, rendition_dir, profile))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let (_registration, cancel_rx) = self.registry.register(key.clone());
        let mut child = command.spawn()?;
        let progress = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(drain_progress(stdout, key.clone())));

        let outcome = tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    RenditionOutcome::Succeeded
                } else {
                    RenditionOutcome::Failed { exit_code: status.code() }
                }
            }
            Ok(()) = cancel_rx => {
                if let Err(err) = child.kill().await {
                    debug!(process = %key, error = %err, "encoder already gone when cancelled");
                }
                RenditionOutcome::Cancelled
            }
        };

        if let Some(progress) = progress {
            if matches!(outcome, RenditionOutcome::Cancelled) {
                // A killed wrapper may leave descendants holding the pipe open.
                progress.abort();
            } else {
                let _ = progress.await;
            }
        }
        Ok(outcome)
    }
}

/// Consumes ffmpeg's `-progress` stream for logging only.
async fn drain_progress(stdout: ChildStdout, key: ProcessKey) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.starts_with("frame=") || line.starts_with("speed=") {
                    debug!(process = %key, "{line}");
                } else if line == "progress=end" {
                    debug!(process = %key, "encoder reported end of stream");
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(process = %key, error = %err, "progress stream closed");
                break;
            }
        }
    }
}

/// Rendition directory that is removed on drop unless the encode succeeded.
#[derive(Debug)]
struct PartialRendition {
    path: Option<PathBuf>,
}

impl PartialRendition {
    fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialRendition {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "removed partial rendition"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove partial rendition"),
        }
    }
}
