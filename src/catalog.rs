//! Thin read/write façade over the `catalog` + `recent` tables (C5). Mirrors
//! the teacher's own `Storage` struct shape (`touch_recent`/`list_recent`)
//! almost exactly, generalized from "recent files" to "catalog entries".

use std::time::{SystemTime, UNIX_EPOCH};

use crate::{engine::CoreError, models::CatalogEntry, storage::Storage};

#[derive(Clone)]
pub(crate) struct Catalog {
  storage: Storage,
}

impl Catalog {
  pub(crate) fn new(storage: Storage) -> Self {
    Self { storage }
  }

  /// Fetches a catalog entry and, if present, bumps it to the front of the
  /// recent list — `get` backs `open_file_info`, which is this engine's only
  /// notion of "using" a file.
  pub(crate) fn get(&self, file_id: &str) -> Result<Option<CatalogEntry>, CoreError> {
    let entry = self.storage.get_catalog(file_id)?;
    if entry.is_some() {
      self.storage.touch_recent(file_id, now_ms())?;
    }
    Ok(entry)
  }

  /// Fetches without touching the recent list; used by query paths
  /// (page/search/stats/get_record) that should not perturb recency order.
  pub(crate) fn peek(&self, file_id: &str) -> Result<Option<CatalogEntry>, CoreError> {
    self.storage.get_catalog(file_id)
  }

  pub(crate) fn list_recent(&self, limit: usize) -> Result<Vec<CatalogEntry>, CoreError> {
    self.storage.list_recent(limit)
  }

  pub(crate) fn forget(&self, file_id: &str) -> Result<(), CoreError> {
    self.storage.forget(file_id)
  }

  pub(crate) fn list_all_ids(&self) -> Result<Vec<String>, CoreError> {
    self.storage.list_all_ids()
  }
}

fn now_ms() -> i64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
