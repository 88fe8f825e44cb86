#![cfg(unix)]

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tempfile::TempDir;

use localtube_core::config::load_localtube_config;
use localtube_core::ingest::{Denial, DiskSpaceSource, IngestError, UploadService};
use localtube_core::transcode::{JobOutcome, ProcessKey, ProcessRegistry};
use localtube_core::{LocaltubeConfig, SqliteVideoStore, VideoStatus, VideoStore};

const GB: u64 = 1_000_000_000;

struct FixedDisk(AtomicU64);

impl FixedDisk {
    fn new(free: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(free)))
    }
}

impl DiskSpaceSource for FixedDisk {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

const PROBE_1080: &str = "echo 1920,1080,12.480000\n";
const PROBE_1080_SLOW: &str = "sleep 0.3\necho 1920,1080,12.480000\n";
const PROBE_GARBAGE: &str = "echo 'moov atom not found'\n";

const ENCODE_OK: &str = r#"for last; do :; done
dir=$(dirname "$last")
mkdir -p "$dir"
: > "$dir/seg_000.ts"
printf '#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n#EXT-X-ENDLIST\n' > "$last"
printf 'frame=12\nspeed=2.1x\nprogress=end\n'
"#;
const ENCODE_FAIL: &str = "exit 1\n";
const ENCODE_FAIL_720: &str = r#"for last; do :; done
case "$last" in
  */720p/*) exit 3 ;;
esac
dir=$(dirname "$last")
printf '#EXTM3U\n#EXT-X-ENDLIST\n' > "$last"
"#;
const ENCODE_HANG: &str = "exec sleep 30\n";
// Without `exec` the shell's sleep child keeps stdout open after a kill.
const ENCODE_HANG_WRAPPED: &str = "sleep 30\n";
const ENCODE_HANG_720: &str = r#"for last; do :; done
case "$last" in
  */720p/*) exec sleep 30 ;;
esac
printf '#EXTM3U\n#EXT-X-ENDLIST\n' > "$last"
"#;

/// All fake tools are written once, before any test spawns a process, so no
/// child can inherit a script that is still open for writing.
fn scripts() -> &'static Path {
    static SCRIPTS: OnceLock<TempDir> = OnceLock::new();
    SCRIPTS
        .get_or_init(|| {
            let dir = TempDir::new().unwrap();
            for (name, body) in [
                ("probe_1080", PROBE_1080),
                ("probe_1080_slow", PROBE_1080_SLOW),
                ("probe_garbage", PROBE_GARBAGE),
                ("encode_ok", ENCODE_OK),
                ("encode_fail", ENCODE_FAIL),
                ("encode_fail_720", ENCODE_FAIL_720),
                ("encode_hang", ENCODE_HANG),
                ("encode_hang_720", ENCODE_HANG_720),
                ("encode_hang_wrapped", ENCODE_HANG_WRAPPED),
            ] {
                let path = dir.path().join(name);
                std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
            dir
        })
        .path()
}

fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(relative)
}

struct Harness {
    _base: TempDir,
    config: LocaltubeConfig,
    store: Arc<dyn VideoStore>,
    disk: Arc<FixedDisk>,
    service: UploadService,
}

fn harness(probe: &str, encode: &str, qualities: &[&str]) -> Harness {
    harness_with(probe, encode, qualities, |_| {})
}

fn harness_with(
    probe: &str,
    encode: &str,
    qualities: &[&str],
    adjust: impl FnOnce(&mut LocaltubeConfig),
) -> Harness {
    let base = TempDir::new().unwrap();
    let mut config = load_localtube_config(fixture_path("configs/localtube.toml")).unwrap();
    config.storage.base_dir = base.path().to_string_lossy().to_string();
    config.transcoding.ffprobe_path = scripts().join(probe);
    config.transcoding.ffmpeg_path = scripts().join(encode);
    config.transcoding.qualities = qualities.iter().map(|label| label.to_string()).collect();
    config.transcoding.job_timeout_seconds = None;
    adjust(&mut config);
    config.ensure_directories().unwrap();

    let sqlite = SqliteVideoStore::builder()
        .path(config.database_path())
        .build()
        .unwrap();
    sqlite.initialize().unwrap();
    let store: Arc<dyn VideoStore> = Arc::new(sqlite);
    let disk = FixedDisk::new(50 * GB);
    let service = UploadService::new(&config, Arc::clone(&store), disk.clone());
    Harness {
        _base: base,
        config,
        store,
        disk,
        service,
    }
}

impl Harness {
    fn status(&self, id: &str) -> VideoStatus {
        self.store.find_by_id(id).unwrap().unwrap().status
    }

    async fn upload(&self, filename: &str, chunks: &[&[u8]]) {
        let total: u64 = chunks.iter().map(|chunk| chunk.len() as u64).sum();
        self.service
            .init(filename, total, chunks.len() as u32, None, None)
            .unwrap();
        for (index, chunk) in chunks.iter().enumerate() {
            self.service
                .write_chunk(filename, index as u32, chunks.len() as u32, chunk)
                .await
                .unwrap();
        }
    }
}

async fn wait_for_encoder(registry: &ProcessRegistry, key: &ProcessKey) {
    for _ in 0..250 {
        if registry.active().contains(key) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("encoder {key} never started");
}

#[tokio::test]
async fn clip_goes_from_upload_to_ready() {
    let h = harness("probe_1080", "encode_ok", &["480p", "720p", "1080p"]);

    let session = h
        .service
        .init("clip.mp4", 10_000_000, 2, Some("Holiday clip"), None)
        .unwrap();
    assert_eq!(session.video_id, "clip");
    assert_eq!(h.status("clip"), VideoStatus::Uploading);

    let chunk = vec![7u8; 5_000_000];
    let first = h.service.write_chunk("clip.mp4", 0, 2, &chunk).await.unwrap();
    assert_eq!(first.progress, 50.0);
    assert_eq!(first.label, "50.0%");
    let second = h.service.write_chunk("clip.mp4", 1, 2, &chunk).await.unwrap();
    assert_eq!(second.progress, 100.0);

    let completed = h.service.complete("clip.mp4").await.unwrap();
    assert_eq!(completed.video_id, "clip");
    assert_eq!(completed.hls_url, "/hls/clip/master.m3u8");
    assert_eq!(h.status("clip"), VideoStatus::Processing);

    let outcome = completed.job.wait().await;
    assert_eq!(
        outcome,
        JobOutcome::Ready {
            renditions: vec!["480p".into(), "720p".into(), "1080p".into()],
            degraded_probe: false,
        }
    );

    let video = h.store.find_by_id("clip").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Ready);
    assert_eq!(video.hls_url(), Some("/hls/clip/master.m3u8"));
    assert_eq!(video.qualities, vec!["480p", "720p", "1080p"]);
    assert_eq!(video.title, "Holiday clip");
    assert_eq!(video.width, Some(1920));
    assert_eq!(video.height, Some(1080));
    assert_eq!(video.duration_seconds, Some(12));
    assert_eq!(video.file_size, Some(10_000_000));
    assert!(video.processed_at.is_some());

    let master = std::fs::read_to_string(h.config.hls_dir().join("clip/master.m3u8")).unwrap();
    assert!(master.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
    assert_eq!(master.matches("#EXT-X-STREAM-INF").count(), 3);
    assert!(h.config.hls_dir().join("clip/720p/playlist.m3u8").exists());
    assert!(!h.config.upload_dir().join("clip.mp4").exists());
    assert_eq!(h.service.dispatcher().metrics().renditions_succeeded, 3);
}

#[tokio::test]
async fn failed_rung_is_left_out_of_the_master() {
    let h = harness("probe_1080", "encode_fail_720", &["480p", "720p", "1080p"]);
    h.upload("clip.mp4", &[b"abc"]).await;

    let outcome = h.service.complete("clip.mp4").await.unwrap().job.wait().await;
    assert_eq!(
        outcome,
        JobOutcome::Ready {
            renditions: vec!["480p".into(), "1080p".into()],
            degraded_probe: false,
        }
    );
    let master = std::fs::read_to_string(h.config.hls_dir().join("clip/master.m3u8")).unwrap();
    assert_eq!(
        master,
        "#EXTM3U\n#EXT-X-VERSION:3\n\
         #EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=854x480\n480p/playlist.m3u8\n\
         #EXT-X-STREAM-INF:BANDWIDTH=6000000,RESOLUTION=1920x1080\n1080p/playlist.m3u8\n"
    );
    assert!(!h.config.hls_dir().join("clip/720p").exists());
}

#[tokio::test]
async fn single_failed_rendition_still_reaches_ready() {
    let h = harness("probe_1080", "encode_fail", &["480p"]);
    h.upload("clip.mp4", &[b"abc", b"def"]).await;

    let outcome = h.service.complete("clip.mp4").await.unwrap().job.wait().await;
    assert_eq!(
        outcome,
        JobOutcome::Ready {
            renditions: vec![],
            degraded_probe: false,
        }
    );
    let video = h.store.find_by_id("clip").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Ready);
    assert!(video.qualities.is_empty());
    let master = std::fs::read_to_string(h.config.hls_dir().join("clip/master.m3u8")).unwrap();
    assert_eq!(master, "#EXTM3U\n#EXT-X-VERSION:3\n");
    assert_eq!(h.service.dispatcher().metrics().renditions_failed, 1);
}

#[tokio::test]
async fn unreadable_probe_is_reported_as_degraded() {
    let h = harness("probe_garbage", "encode_ok", &["480p", "720p", "1080p", "2160p"]);
    h.upload("clip.mp4", &[b"abc"]).await;

    let outcome = h.service.complete("clip.mp4").await.unwrap().job.wait().await;
    assert_eq!(
        outcome,
        JobOutcome::Ready {
            renditions: vec!["480p".into(), "720p".into(), "1080p".into()],
            degraded_probe: true,
        }
    );
    let video = h.store.find_by_id("clip").unwrap().unwrap();
    assert_eq!(video.duration_seconds, Some(0));
    assert_eq!(h.service.dispatcher().metrics().probes_degraded, 1);
}

#[tokio::test]
async fn cancel_kills_running_encoder_once() {
    let h = harness("probe_1080", "encode_hang", &["480p"]);
    h.upload("clip.mp4", &[b"abc"]).await;

    let completed = h.service.complete("clip.mp4").await.unwrap();
    let registry = h.service.dispatcher().registry();
    for _ in 0..250 {
        if registry.is_active("clip") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registry.is_active("clip"));

    assert_eq!(h.service.cancel("clip"), 1);
    assert!(registry.is_empty());
    assert_eq!(h.service.cancel("clip"), 0);

    let outcome = tokio::time::timeout(Duration::from_secs(10), completed.job.wait())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Ready {
            renditions: vec![],
            degraded_probe: false,
        }
    );
    assert!(!h.config.hls_dir().join("clip/480p").exists());
}

#[tokio::test]
async fn cancel_does_not_wait_for_orphaned_pipe_holders() {
    let h = harness("probe_1080", "encode_hang_wrapped", &["480p"]);
    h.upload("clip.mp4", &[b"abc"]).await;

    let completed = h.service.complete("clip.mp4").await.unwrap();
    let registry = h.service.dispatcher().registry();
    wait_for_encoder(&registry, &ProcessKey::new("clip", "480p")).await;
    assert_eq!(h.service.cancel("clip"), 1);

    let outcome = tokio::time::timeout(Duration::from_secs(5), completed.job.wait())
        .await
        .expect("cancelled job finishes without waiting for the encoder's children");
    assert!(outcome.is_ready());
    assert!(!h.config.hls_dir().join("clip/480p").exists());
}

#[tokio::test]
async fn expired_job_is_failed_and_cleaned_up() {
    let h = harness_with("probe_1080", "encode_hang", &["480p"], |config| {
        config.transcoding.job_timeout_seconds = Some(1);
    });
    h.upload("clip.mp4", &[b"abc"]).await;

    let outcome = h.service.complete("clip.mp4").await.unwrap().job.wait().await;
    assert_eq!(outcome, JobOutcome::TimedOut);
    assert_eq!(h.status("clip"), VideoStatus::Failed);
    assert!(!h.config.upload_dir().join("clip.mp4").exists());
    assert!(!h.config.hls_dir().join("clip/480p").exists());
    assert!(h.service.dispatcher().registry().is_empty());
    assert_eq!(h.service.dispatcher().metrics().jobs_timed_out, 1);
}

#[tokio::test]
async fn produced_rungs_are_visible_while_job_runs() {
    let h = harness("probe_1080", "encode_hang_720", &["480p", "720p"]);
    h.upload("clip.mp4", &[b"abc"]).await;

    let completed = h.service.complete("clip.mp4").await.unwrap();
    let registry = h.service.dispatcher().registry();
    wait_for_encoder(&registry, &ProcessKey::new("clip", "720p")).await;

    let video = h.store.find_by_id("clip").unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Processing);
    assert_eq!(video.qualities, vec!["480p"]);
    assert!(video.processed_at.is_none());

    assert_eq!(h.service.cancel("clip"), 1);
    let outcome = tokio::time::timeout(Duration::from_secs(10), completed.job.wait())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Ready {
            renditions: vec!["480p".into()],
            degraded_probe: false,
        }
    );
}

#[tokio::test]
async fn worker_pool_holds_back_other_videos() {
    let h = harness_with("probe_1080", "encode_hang", &["480p"], |config| {
        config.transcoding.max_concurrent_jobs = 1;
    });
    h.upload("first.mp4", &[b"abc"]).await;
    h.upload("second.mp4", &[b"def"]).await;

    let dispatcher = h.service.dispatcher();
    let registry = dispatcher.registry();
    let first = h.service.complete("first.mp4").await.unwrap();
    wait_for_encoder(&registry, &ProcessKey::new("first", "480p")).await;
    let second = h.service.complete("second.mp4").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.active(), vec![ProcessKey::new("first", "480p")]);
    assert_eq!(dispatcher.available_slots(), 0);
    assert!(!second.job.is_finished());
    assert_eq!(h.status("second"), VideoStatus::Processing);

    assert_eq!(h.service.cancel("first"), 1);
    wait_for_encoder(&registry, &ProcessKey::new("second", "480p")).await;
    assert!(first.job.wait().await.is_ready());
    assert_eq!(registry.active(), vec![ProcessKey::new("second", "480p")]);

    assert_eq!(h.service.cancel("second"), 1);
    assert!(second.job.wait().await.is_ready());
    assert_eq!(dispatcher.available_slots(), 1);
}

#[tokio::test]
async fn completing_twice_runs_two_jobs() {
    let h = harness_with("probe_1080_slow", "encode_ok", &["480p"], |config| {
        config.transcoding.max_concurrent_jobs = 1;
    });
    h.upload("clip.mp4", &[b"abc"]).await;

    let first = h.service.complete("clip.mp4").await.unwrap();
    let second = h.service.complete("clip.mp4").await.unwrap();
    assert_eq!(h.service.dispatcher().metrics().jobs_submitted, 2);

    assert!(first.job.wait().await.is_ready());
    // The first job already consumed the source upload.
    assert!(matches!(second.job.wait().await, JobOutcome::Failed { .. }));
    assert_eq!(h.status("clip"), VideoStatus::Failed);
}

#[tokio::test]
async fn oversized_upload_is_refused_at_init() {
    let h = harness("probe_1080", "encode_ok", &["480p"]);
    let err = h
        .service
        .init("huge.mp4", 6 * 1024 * 1024 * 1024, 10, None, None)
        .unwrap_err();
    assert!(matches!(err, IngestError::Denied(Denial::TooLarge { .. })));
    assert!(h.store.find_by_id("huge").unwrap().is_none());
}

#[tokio::test]
async fn init_rechecks_free_space() {
    let h = harness("probe_1080", "encode_ok", &["480p"]);
    h.disk.0.store(2 * GB, Ordering::SeqCst);
    let err = h
        .service
        .init("clip.mp4", GB, 1, None, None)
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Denied(Denial::InsufficientSpace { available, .. }) if available == 2 * GB
    ));
}

#[tokio::test]
async fn denied_chunk_discards_partial_upload() {
    let h = harness_with("probe_1080", "encode_ok", &["480p"], |config| {
        config.storage.disk_cache_ttl_ms = 0;
    });
    h.service.init("clip.mp4", 20, 2, None, None).unwrap();
    h.service
        .write_chunk("clip.mp4", 0, 2, &[1u8; 10])
        .await
        .unwrap();
    let partial = h.config.upload_dir().join("clip.mp4");
    assert!(partial.exists());

    h.disk.0.store(h.config.storage.min_disk_free, Ordering::SeqCst);
    let err = h
        .service
        .write_chunk("clip.mp4", 1, 2, &[1u8; 10])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Denied(Denial::InsufficientSpace { .. })));
    assert!(!partial.exists());
    assert_eq!(h.status("clip"), VideoStatus::Uploading);
}

#[tokio::test]
async fn size_check_is_optional() {
    let h = harness_with("probe_1080", "encode_ok", &["480p"], |config| {
        config.storage.verify_upload_size = true;
    });
    h.service.init("clip.mp4", 100, 1, None, None).unwrap();
    h.service.write_chunk("clip.mp4", 0, 1, b"short").await.unwrap();

    let err = h.service.complete("clip.mp4").await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::SizeMismatch {
            declared: 100,
            actual: 5
        }
    ));
    assert_eq!(h.status("clip"), VideoStatus::Uploading);
    assert_eq!(h.service.sessions().len(), 1);

    let lenient = harness("probe_1080", "encode_ok", &["480p"]);
    lenient.service.init("clip.mp4", 100, 1, None, None).unwrap();
    lenient
        .service
        .write_chunk("clip.mp4", 0, 1, b"short")
        .await
        .unwrap();
    let completed = lenient.service.complete("clip.mp4").await.unwrap();
    assert!(completed.job.wait().await.is_ready());
}

#[tokio::test]
async fn completing_without_chunks_is_an_error() {
    let h = harness("probe_1080", "encode_ok", &["480p"]);
    h.service.init("clip.mp4", 10, 1, None, None).unwrap();
    let err = h.service.complete("clip.mp4").await.unwrap_err();
    assert!(matches!(err, IngestError::MissingUpload(_)));
    assert_eq!(h.status("clip"), VideoStatus::Uploading);
}
