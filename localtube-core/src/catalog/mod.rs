pub mod error;
pub mod library;
pub mod models;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use library::VideoLibrary;
pub use models::{Comment, QualityProfile, Video, VideoStatus, STANDARD_LADDER};
pub use store::{SqliteVideoStore, SqliteVideoStoreBuilder, VideoStore, MAX_LISTING};
