mod commands;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use clap::{Args, Parser, Subcommand, ValueEnum};
use localtube_core::{
    load_localtube_config, Comment, LocaltubeConfig, SqliteVideoStore, Video, VideoLibrary,
    VideoStatus, VideoStore,
};
use serde::Serialize;
use thiserror::Error;

pub use commands::health::{CheckStatus, HealthEntry};
pub use commands::upload::{chunk_count, UploadArgs, UploadReport};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] localtube_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] localtube_core::StoreError),
    #[error("upload error: {0}")]
    Ingest(#[from] localtube_core::IngestError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "LocalTube command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to localtube.toml
    #[arg(long, default_value = "configs/localtube.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Uploads a local file in chunks and waits for transcoding
    Upload(UploadArgs),
    /// Catalog operations
    #[command(subcommand)]
    Videos(VideoCommands),
    /// Runs health checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Subcommand, Debug)]
pub enum VideoCommands {
    /// Lists videos, newest first
    List(VideoListArgs),
    /// Shows one video
    Show(VideoIdArgs),
    /// Searches titles and descriptions
    Search(VideoSearchArgs),
    /// Records a view
    View(VideoIdArgs),
    /// Records a like
    Like(VideoIdArgs),
    /// Appends a comment
    Comment(CommentArgs),
    /// Removes the upload, the renditions and the record
    Delete(VideoIdArgs),
}

#[derive(Args, Debug)]
pub struct VideoListArgs {
    /// Only videos with this status
    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Args, Debug)]
pub struct VideoIdArgs {
    pub id: String,
}

#[derive(Args, Debug)]
pub struct VideoSearchArgs {
    pub query: String,
}

#[derive(Args, Debug)]
pub struct CommentArgs {
    pub id: String,
    #[arg(long)]
    pub user_id: String,
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub text: String,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Checks tools, directories, database and free space
    Check,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Upload(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(context.upload(args))?;
            render(&report, cli.format)?;
        }
        Commands::Videos(command) => context.videos(command, cli.format)?,
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check()?;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

pub(crate) struct AppContext {
    config: LocaltubeConfig,
    config_path: PathBuf,
    store: Arc<SqliteVideoStore>,
    library: VideoLibrary,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config_path", &self.config_path)
            .field("database", &self.store.path())
            .finish()
    }
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_localtube_config(&config_path)?;
        config.ensure_directories()?;

        let store = SqliteVideoStore::builder()
            .path(config.database_path())
            .create_if_missing(true)
            .build()?;
        store.initialize()?;
        let store = Arc::new(store);
        let library = VideoLibrary::new(Arc::clone(&store) as Arc<dyn VideoStore>, &config);

        Ok(Self {
            config,
            config_path,
            store,
            library,
        })
    }

    pub(crate) fn config(&self) -> &LocaltubeConfig {
        &self.config
    }

    pub(crate) fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub(crate) fn store(&self) -> Arc<dyn VideoStore> {
        Arc::clone(&self.store) as Arc<dyn VideoStore>
    }

    pub(crate) fn sqlite(&self) -> &SqliteVideoStore {
        &self.store
    }

    fn videos(&self, command: &VideoCommands, format: OutputFormat) -> Result<()> {
        match command {
            VideoCommands::List(args) => render(&self.video_list(args)?, format),
            VideoCommands::Show(args) => render(&self.video_show(&args.id)?, format),
            VideoCommands::Search(args) => render(&self.video_search(&args.query)?, format),
            VideoCommands::View(args) => render(&self.record_view(&args.id)?, format),
            VideoCommands::Like(args) => render(&self.record_like(&args.id)?, format),
            VideoCommands::Comment(args) => render(&self.add_comment(args)?, format),
            VideoCommands::Delete(args) => render(&self.delete_video(&args.id)?, format),
        }
    }

    fn video_list(&self, args: &VideoListArgs) -> Result<VideoList> {
        let videos = match &args.status {
            Some(raw) => {
                let status = raw
                    .parse::<VideoStatus>()
                    .map_err(AppError::InvalidArgument)?;
                self.library.list_by_status(status)?
            }
            None => self.library.list()?,
        };
        Ok(VideoList::from_videos(&videos))
    }

    fn video_show(&self, id: &str) -> Result<Video> {
        self.library
            .get(id)?
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    fn video_search(&self, query: &str) -> Result<VideoList> {
        Ok(VideoList::from_videos(&self.library.search(query)?))
    }

    fn record_view(&self, id: &str) -> Result<Counters> {
        if !self.library.increment_views(id)? {
            return Err(AppError::NotFound(id.to_string()));
        }
        self.counters(id)
    }

    fn record_like(&self, id: &str) -> Result<Counters> {
        if !self.library.increment_likes(id)? {
            return Err(AppError::NotFound(id.to_string()));
        }
        self.counters(id)
    }

    fn counters(&self, id: &str) -> Result<Counters> {
        let video = self.video_show(id)?;
        Ok(Counters {
            video_id: video.id,
            views: video.views,
            likes: video.likes,
            comments: video.comments.len(),
        })
    }

    fn add_comment(&self, args: &CommentArgs) -> Result<Comment> {
        if args.text.trim().is_empty() {
            return Err(AppError::InvalidArgument("comment text is empty".into()));
        }
        self.library
            .add_comment(&args.id, &args.user_id, &args.username, &args.text)?
            .ok_or_else(|| AppError::NotFound(args.id.clone()))
    }

    fn delete_video(&self, id: &str) -> Result<DeleteResult> {
        let deleted = self.library.delete_video(id)?;
        Ok(DeleteResult {
            video_id: id.to_string(),
            deleted,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct VideoList {
    pub rows: Vec<VideoEntry>,
}

#[derive(Debug, Serialize)]
pub struct VideoEntry {
    pub id: String,
    pub title: String,
    pub status: VideoStatus,
    pub qualities: Vec<String>,
    pub duration_seconds: Option<u32>,
    pub views: u64,
    pub likes: u64,
    pub uploaded_at: String,
}

impl VideoList {
    fn from_videos(videos: &[Video]) -> Self {
        let rows = videos
            .iter()
            .map(|video| VideoEntry {
                id: video.id.clone(),
                title: video.title.clone(),
                status: video.status,
                qualities: video.qualities.clone(),
                duration_seconds: video.duration_seconds,
                views: video.views,
                likes: video.likes,
                uploaded_at: video
                    .uploaded_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            })
            .collect();
        Self { rows }
    }
}

impl DisplayFallback for VideoList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No videos found".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let qualities = if entry.qualities.is_empty() {
                "-".to_string()
            } else {
                entry.qualities.join(",")
            };
            let duration = entry
                .duration_seconds
                .map(|v| format!("{v}s"))
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "{} | {} | status={} | renditions={} | dur={} | views={} likes={}",
                entry.id, entry.title, entry.status, qualities, duration, entry.views, entry.likes
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Video {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("{} ({})", self.title, self.id),
            format!("  status: {}", self.status),
            format!("  file: {}", self.filename),
        ];
        if !self.description.is_empty() {
            lines.push(format!("  description: {}", self.description));
        }
        if let (Some(width), Some(height)) = (self.width, self.height) {
            lines.push(format!("  source: {width}x{height}"));
        }
        if let Some(duration) = self.duration_seconds {
            lines.push(format!("  duration: {duration}s"));
        }
        if let Some(size) = self.file_size {
            lines.push(format!("  size: {size} bytes"));
        }
        if !self.qualities.is_empty() {
            lines.push(format!("  renditions: {}", self.qualities.join(", ")));
        }
        if let Some(url) = self.hls_url() {
            lines.push(format!("  playlist: {url}"));
        }
        lines.push(format!(
            "  views: {}, likes: {}, comments: {}",
            self.views,
            self.likes,
            self.comments.len()
        ));
        lines.push(format!(
            "  uploaded: {}",
            self.uploaded_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        if let Some(processed) = self.processed_at {
            lines.push(format!(
                "  processed: {}",
                processed.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        for comment in &self.comments {
            lines.push(format!("  > {}: {}", comment.username, comment.text));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Comment {
    fn display(&self) -> String {
        format!("Comment {} by {}: {}", self.id, self.username, self.text)
    }
}

#[derive(Debug, Serialize)]
pub struct Counters {
    pub video_id: String,
    pub views: u64,
    pub likes: u64,
    pub comments: usize,
}

impl DisplayFallback for Counters {
    fn display(&self) -> String {
        format!(
            "{}: views={} likes={} comments={}",
            self.video_id, self.views, self.likes, self.comments
        )
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub video_id: String,
    pub deleted: bool,
}

impl DisplayFallback for DeleteResult {
    fn display(&self) -> String {
        if self.deleted {
            format!("Deleted {}", self.video_id)
        } else {
            format!("Nothing to delete for {}", self.video_id)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) fn prepare_test_context() -> Result<(TempDir, AppContext)> {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let template = fs::read_to_string("../configs/localtube.toml").unwrap();
        let config = template
            .replace(
                "base_dir = \"/var/lib/localtube\"",
                &format!("base_dir = \"{}\"", root.display()),
            )
            .replace("ffmpeg_path = \"ffmpeg\"", "ffmpeg_path = \"/nonexistent/ffmpeg\"")
            .replace(
                "ffprobe_path = \"ffprobe\"",
                "ffprobe_path = \"/nonexistent/ffprobe\"",
            );
        let config_path = root.join("localtube.toml");
        fs::write(&config_path, config).unwrap();

        let cli = Cli {
            config: config_path,
            format: OutputFormat::Json,
            command: Commands::Health(HealthCommands::Check),
        };
        let context = AppContext::new(&cli)?;
        Ok((temp, context))
    }

    fn seed(context: &AppContext, id: &str, title: &str, description: &str) -> Video {
        context
            .library
            .create_video(
                id,
                &format!("{id}.mp4"),
                &format!("{id}.mp4"),
                Some(title),
                Some(description),
            )
            .unwrap()
    }

    #[test]
    fn context_uses_configured_layout() {
        let (temp, context) = prepare_test_context().unwrap();
        assert_eq!(context.config().upload_dir(), temp.path().join("uploads"));
        assert!(context.config().hls_dir().is_dir());
        assert!(context.sqlite().path().exists());
    }

    #[test]
    fn listing_filters_by_status() {
        let (_temp, context) = prepare_test_context().unwrap();
        seed(&context, "a", "First", "");
        seed(&context, "b", "Second", "");
        context
            .store()
            .update_status("b", VideoStatus::Ready)
            .unwrap();

        let all = context.video_list(&VideoListArgs { status: None }).unwrap();
        assert_eq!(all.rows.len(), 2);
        let ready = context
            .video_list(&VideoListArgs {
                status: Some("ready".into()),
            })
            .unwrap();
        assert_eq!(ready.rows.len(), 1);
        assert_eq!(ready.rows[0].id, "b");

        let err = context
            .video_list(&VideoListArgs {
                status: Some("encoding".into()),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn search_prefers_title_hits() {
        let (_temp, context) = prepare_test_context().unwrap();
        seed(&context, "desc", "Weekend", "a trip to the mountains");
        seed(&context, "title", "Mountains timelapse", "");
        seed(&context, "other", "Cooking", "pasta");

        let found = context.video_search("mountains").unwrap();
        let ids: Vec<_> = found.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["title", "desc"]);
    }

    #[test]
    fn interactions_update_counters() {
        let (_temp, context) = prepare_test_context().unwrap();
        seed(&context, "clip", "Clip", "");
        context.record_view("clip").unwrap();
        context.record_view("clip").unwrap();
        let counters = context.record_like("clip").unwrap();
        assert_eq!(counters.views, 2);
        assert_eq!(counters.likes, 1);

        let comment = context
            .add_comment(&CommentArgs {
                id: "clip".into(),
                user_id: "u1".into(),
                username: "ana".into(),
                text: "nice".into(),
            })
            .unwrap();
        assert!(!comment.id.is_empty());
        let video = context.video_show("clip").unwrap();
        assert_eq!(video.comments.len(), 1);
        assert!(video.display().contains("> ana: nice"));

        assert!(matches!(
            context.record_view("missing").unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn delete_reports_missing_ids() {
        let (_temp, context) = prepare_test_context().unwrap();
        seed(&context, "clip", "Clip", "");
        assert!(context.delete_video("clip").unwrap().deleted);
        assert!(!context.delete_video("clip").unwrap().deleted);
        assert!(matches!(
            context.video_show("clip").unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn list_renders_text_and_json() {
        let (_temp, context) = prepare_test_context().unwrap();
        seed(&context, "clip", "Clip", "");
        let list = context.video_list(&VideoListArgs { status: None }).unwrap();
        assert!(list.display().contains("clip | Clip | status=UPLOADING"));
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["rows"][0]["status"], "UPLOADING");
    }
}
