use std::{path::Path, sync::Arc, time::Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::{
  catalog::Catalog,
  coordinator::Coordinator,
  export as export_impl,
  fingerprint::fingerprint,
  models::{
    CatalogEntry, ExportRequest, ExportResult, FileFormat, IndexStatus, OpenFileInfo, PageResult,
    Record, SearchQuery, SearchResult, StatsResult,
  },
  reader::RecordReader,
  storage::{Storage, StorageOptions},
};

#[derive(Debug, Error)]
pub enum CoreError {
  #[error("Validation error: {0}")]
  Validation(String),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("unsupported format: {0:?}")]
  UnsupportedFormat(FileFormat),
  #[error("unknown file: {0}")]
  UnknownFile(String),
  #[error("invalid argument: {0}")]
  InvalidArg(String),
  #[error("storage error: {0}")]
  Storage(String),
  #[error("indexing job error: {0}")]
  Job(String),
  #[error("job already running for file: {0}")]
  JobAlreadyRunning(String),
  #[error("indexing cancelled")]
  Cancelled,
  #[error("invariant violation: {0}")]
  Invariant(String),
}

impl CoreError {
  /// Whether this should be rendered as `{"error": "Validation error: ..."}`
  /// by the request-bridge layer rather than a bare `{"error": message}`.
  pub fn is_validation(&self) -> bool {
    matches!(self, CoreError::Validation(_))
  }
}

#[derive(Debug, Clone)]
pub struct CoreOptions {
  pub chunk_bytes: usize,
  pub progress_interval_ms: u64,
  pub default_page_limit: u64,
  pub max_page_limit: u64,
  pub recent_limit: usize,
  pub meta_cache_size: usize,
  pub position_cache_size: usize,
  pub record_cache_size: usize,
  pub stats_top_n: usize,
  pub stats_distinct_cap: usize,
  pub stats_columns: usize,
  pub storage: StorageOptions,
}

impl Default for CoreOptions {
  fn default() -> Self {
    Self {
      chunk_bytes: 32 * 1024 * 1024,
      progress_interval_ms: 100,
      default_page_limit: 50,
      max_page_limit: 1000,
      recent_limit: 20,
      meta_cache_size: 20,
      position_cache_size: 10,
      record_cache_size: 1000,
      stats_top_n: 30,
      stats_distinct_cap: 100,
      stats_columns: 10,
      storage: StorageOptions::default(),
    }
  }
}

/// The engine façade: every method here is the implementation of one row of
/// the request API (open_file_info, list_recent, forget_recent, clear_all,
/// start_index, cancel_index, page, search, get_record, stats, export).
#[derive(Clone)]
pub struct CoreEngine {
  options: CoreOptions,
  storage: Storage,
  catalog: Catalog,
  coordinator: Coordinator,
  reader: Arc<Mutex<RecordReader>>,
}

impl CoreEngine {
  pub fn new(options: CoreOptions) -> Result<Self, CoreError> {
    let storage = Storage::new(options.storage.clone()).map_err(CoreError::Storage)?;
    storage.migrate_legacy_artifacts()?;
    let catalog = Catalog::new(storage.clone());
    let coordinator = Coordinator::new(storage.clone(), options.clone());
    let reader = RecordReader::new(
      storage.clone(),
      options.meta_cache_size,
      options.position_cache_size,
      options.record_cache_size,
    );
    Ok(Self {
      options,
      storage,
      catalog,
      coordinator,
      reader: Arc::new(Mutex::new(reader)),
    })
  }

  fn validate_path(path: &Path) -> Result<(), CoreError> {
    let s = path.to_string_lossy();
    if s.len() > 4096 {
      return Err(CoreError::Validation("path exceeds 4096 bytes".into()));
    }
    if !path.exists() {
      return Err(CoreError::Validation(format!("path does not exist: {s}")));
    }
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
      return Err(CoreError::Validation(format!("not a regular file: {s}")));
    }
    let ext = path
      .extension()
      .and_then(|e| e.to_str())
      .unwrap_or("")
      .to_ascii_lowercase();
    if !matches!(ext.as_str(), "json" | "csv" | "vcf") {
      return Err(CoreError::Validation(format!("unsupported extension: .{ext}")));
    }
    Ok(())
  }

  fn validate_id(id: &str) -> Result<(), CoreError> {
    if id.len() != 16 || !id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
      return Err(CoreError::Validation(format!("malformed file id: {id}")));
    }
    Ok(())
  }

  fn validate_page_limit(&self, page: u64, limit: u64) -> Result<u64, CoreError> {
    if page < 1 || page > 1_000_000 {
      return Err(CoreError::Validation(format!("page out of range: {page}")));
    }
    if limit == 0 {
      return Ok(self.options.default_page_limit);
    }
    if limit > self.options.max_page_limit {
      return Err(CoreError::Validation(format!("limit out of range: {limit}")));
    }
    Ok(limit)
  }

  fn validate_filters(filters: &std::collections::BTreeMap<String, String>) -> Result<(), CoreError> {
    if filters.len() > 50 {
      return Err(CoreError::Validation("too many filter keys (max 50)".into()));
    }
    for (k, v) in filters {
      if k.len() > 256 {
        return Err(CoreError::Validation(format!("filter key too long: {k}")));
      }
      if v.len() > 1000 {
        return Err(CoreError::Validation(format!("filter value too long for key {k}")));
      }
    }
    Ok(())
  }

  fn identify(path: &Path) -> Result<(String, u64, i64), CoreError> {
    let meta = std::fs::metadata(path)?;
    let size = meta.len();
    let mtime_ms = meta
      .modified()
      .ok()
      .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
      .map(|d| d.as_millis() as i64)
      .unwrap_or(0);
    let id = fingerprint(&path.to_string_lossy(), size, mtime_ms);
    Ok((id, size, mtime_ms))
  }

  /// `open_file_info(path) -> catalog-shaped record with an `indexed` flag`.
  pub fn open_file_info(&self, path: impl AsRef<Path>) -> Result<OpenFileInfo, CoreError> {
    let path = path.as_ref();
    Self::validate_path(path)?;
    let (file_id, _size, _mtime) = Self::identify(path)?;
    let entry = self.catalog.get(&file_id)?;
    Ok(OpenFileInfo {
      indexed: entry.is_some(),
      entry,
      path: path.to_string_lossy().to_string(),
    })
  }

  pub fn list_recent(&self) -> Result<Vec<CatalogEntry>, CoreError> {
    self.catalog.list_recent(self.options.recent_limit)
  }

  pub fn forget_recent(&self, file_id: &str) -> Result<(), CoreError> {
    Self::validate_id(file_id)?;
    self.catalog.forget(file_id)?;
    self.reader.lock().invalidate(file_id);
    crate::storage::delete_artifacts(&self.storage.indexes_dir(), file_id)?;
    Ok(())
  }

  pub fn clear_all(&self) -> Result<(), CoreError> {
    let ids = self.catalog.list_all_ids()?;
    for id in &ids {
      self.catalog.forget(id)?;
      self.reader.lock().invalidate(id);
      crate::storage::delete_artifacts(&self.storage.indexes_dir(), id)?;
    }
    Ok(())
  }

  /// `start_index(path) -> file_id`; poll progress via `index_status`.
  pub fn start_index(&self, path: impl AsRef<Path>) -> Result<String, CoreError> {
    let path = path.as_ref();
    Self::validate_path(path)?;
    let (file_id, size, mtime_ms) = Self::identify(path)?;
    self
      .coordinator
      .start(file_id.clone(), path.to_path_buf(), size, mtime_ms)?;
    Ok(file_id)
  }

  pub fn index_status(&self, file_id: &str) -> Result<IndexStatus, CoreError> {
    Self::validate_id(file_id)?;
    self.coordinator.status(file_id)
  }

  pub fn cancel_index(&self, file_id: &str) -> Result<(), CoreError> {
    Self::validate_id(file_id)?;
    self.coordinator.cancel(file_id)
  }

  pub fn page(
    &self,
    file_id: &str,
    page: u64,
    limit: u64,
    filters: std::collections::BTreeMap<String, String>,
  ) -> Result<PageResult, CoreError> {
    Self::validate_id(file_id)?;
    Self::validate_filters(&filters)?;
    let limit = self.validate_page_limit(page, limit)?;
    let entry = self.require_catalog(file_id)?;
    let rows = self.storage.page(file_id, &entry, page, limit, &filters)?;
    let total = self.storage.count(file_id, &entry, &filters)?;
    let mut records = Vec::with_capacity(rows.len());
    let mut reader = self.reader.lock();
    for (row_index, position) in rows {
      records.push(reader.decode_at(&entry, row_index, position, None)?);
    }
    Ok(PageResult { records, page, limit, total })
  }

  pub fn search(&self, file_id: &str, query: SearchQuery) -> Result<SearchResult, CoreError> {
    Self::validate_id(file_id)?;
    let started = Instant::now();
    let limit = self.validate_page_limit(query.page, query.limit)?;
    let page = query.page;
    let entry = self.require_catalog(file_id)?;
    let (rows, total) = self.storage.search(file_id, &entry, &query, page, limit)?;
    let mut records = Vec::with_capacity(rows.len());
    let mut reader = self.reader.lock();
    for (row_index, position) in rows {
      records.push(reader.decode_at(&entry, row_index, position, Some(query.exact))?);
    }
    Ok(SearchResult {
      records,
      total,
      page,
      limit,
      elapsed_ms: started.elapsed().as_millis() as u64,
    })
  }

  pub fn get_record(&self, file_id: &str, index: u64) -> Result<Record, CoreError> {
    Self::validate_id(file_id)?;
    let entry = self.require_catalog(file_id)?;
    let mut reader = self.reader.lock();
    reader.get_record(&entry, index)
  }

  pub fn stats(&self, file_id: &str) -> Result<StatsResult, CoreError> {
    Self::validate_id(file_id)?;
    self.require_catalog(file_id)?;
    self.storage.load_stats(file_id)
  }

  pub fn export(
    &self,
    file_id: &str,
    request: ExportRequest,
    output_path: impl AsRef<Path>,
  ) -> Result<ExportResult, CoreError> {
    Self::validate_id(file_id)?;
    let entry = self.require_catalog(file_id)?;
    export_impl::export(self, &entry, request, output_path.as_ref())
  }

  fn require_catalog(&self, file_id: &str) -> Result<CatalogEntry, CoreError> {
    self
      .catalog
      .peek(file_id)?
      .ok_or_else(|| CoreError::UnknownFile(file_id.to_string()))
  }

  pub(crate) fn reader(&self) -> &Arc<Mutex<RecordReader>> {
    &self.reader
  }

  pub(crate) fn storage(&self) -> &Storage {
    &self.storage
  }
}
