//! Repository traits for catalog operations.

pub mod datasets;
pub mod file_records;
pub mod repositories;
pub mod sessions;
pub mod watermarks;

pub use datasets::{DatasetFilter, DatasetRepo};
pub use file_records::{FileRecordFilter, FileRecordRepo};
pub use repositories::RepositoryRepo;
pub use sessions::SessionRepo;
pub use watermarks::WatermarkRepo;
