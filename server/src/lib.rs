pub mod analysis;
pub mod error;
pub mod files;
pub mod issues;
pub mod metadata;
pub mod pages;
pub mod serve;

// Re-exports for easy access
pub use analysis::{AnalysisParams, AnalysisResult, CommandEngine, WinstonLutzEngine};
pub use error::AppError;
pub use files::FileStore;
pub use issues::{IssueTracker, IssueTrackerConfig};
pub use metadata::{MetadataStore, UploadedFile};
pub use serve::{router, AppState};
