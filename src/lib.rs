mod catalog;
mod coordinator;
mod engine;
mod export;
mod fingerprint;
mod formats;
mod indexer;
mod models;
mod position;
mod reader;
mod stats;
mod storage;

pub use crate::engine::{CoreEngine, CoreError, CoreOptions};
pub use crate::models::{
  CatalogEntry, ColumnStats, ExportFormat, ExportRequest, ExportResult, FieldValue, FileFormat,
  IndexStatus, JobState, OpenFileInfo, PageResult, Record, SearchField, SearchOperator, SearchQuery,
  SearchResult, StatsResult,
};
pub use crate::storage::{Storage, StorageOptions};
