//! Record reader (C7): resolves a `(row_index, position)` pair — or just a
//! `row_index`, via the position table — into a fully decoded `Record`.
//!
//! Three LRU caches, matching spec.md §3/§5 exactly:
//! - `meta`: open file handles per file-id (20 entries).
//! - `positions`: loaded position tables per file-id (10 files).
//! - `records`: decoded records per (file-id, row-index) (1000 entries).
//!
//! All three are single-thread-owned by the request-serving thread (guarded
//! by the caller's `Mutex<RecordReader>`); the indexing thread never touches
//! them directly — it only triggers invalidation through `invalidate`.

use std::{
  fs::File,
  io::{Read, Seek, SeekFrom},
  sync::Arc,
};

use lru::LruCache;
use parking_lot::Mutex;

use crate::{
  engine::CoreError,
  formats::{csv, json_to_field, vcard},
  models::{CatalogEntry, FieldValue, FileFormat, Record},
  storage::Storage,
};

const GROW_START: usize = 64 * 1024;
const GROW_MAX: usize = 64 * 1024 * 1024;

pub(crate) struct RecordReader {
  storage: Storage,
  meta: LruCache<String, Arc<Mutex<File>>>,
  positions: LruCache<String, Arc<Vec<u64>>>,
  records: LruCache<(String, u64), Record>,
}

impl RecordReader {
  pub(crate) fn new(storage: Storage, meta_cap: usize, position_cap: usize, record_cap: usize) -> Self {
    Self {
      storage,
      meta: LruCache::new(nz(meta_cap)),
      positions: LruCache::new(nz(position_cap)),
      records: LruCache::new(nz(record_cap)),
    }
  }

  pub(crate) fn invalidate(&mut self, file_id: &str) {
    self.meta.pop(file_id);
    self.positions.pop(file_id);
    let stale: Vec<(String, u64)> = self
      .records
      .iter()
      .map(|(k, _)| k.clone())
      .filter(|(id, _)| id == file_id)
      .collect();
    for key in stale {
      self.records.pop(&key);
    }
  }

  fn file_handle(&mut self, entry: &CatalogEntry) -> Result<Arc<Mutex<File>>, CoreError> {
    if let Some(handle) = self.meta.get(&entry.file_id) {
      return Ok(handle.clone());
    }
    let file = File::open(&entry.path)?;
    let handle = Arc::new(Mutex::new(file));
    self.meta.put(entry.file_id.clone(), handle.clone());
    Ok(handle)
  }

  fn position_table(&mut self, entry: &CatalogEntry) -> Result<Arc<Vec<u64>>, CoreError> {
    if let Some(table) = self.positions.get(&entry.file_id) {
      return Ok(table.clone());
    }
    let path = self.storage.indexes_dir().join(format!("{}.index.bin", entry.file_id));
    let table = Arc::new(crate::position::load(&path)?);
    self.positions.put(entry.file_id.clone(), table.clone());
    Ok(table)
  }

  /// Decode a record whose position is already known (used by `page` and
  /// `search`, which source `(row_index, position)` pairs from the `search`
  /// table directly).
  pub(crate) fn decode_at(
    &mut self,
    entry: &CatalogEntry,
    row_index: u64,
    position: u64,
    exact: Option<bool>,
  ) -> Result<Record, CoreError> {
    let key = (entry.file_id.clone(), row_index);
    if let Some(cached) = self.records.get(&key) {
      let mut record = cached.clone();
      record.exact = exact;
      return Ok(record);
    }

    let handle = self.file_handle(entry)?;
    let fields = decode_record_bytes(&handle, entry, position)?;
    let record = Record { fields, index: row_index, exact };
    self.records.put(key, record.clone());
    Ok(record)
  }

  /// Resolve by row index alone — loads the position table if needed, then
  /// delegates to `decode_at`.
  pub(crate) fn get_record(&mut self, entry: &CatalogEntry, row_index: u64) -> Result<Record, CoreError> {
    let table = self.position_table(entry)?;
    let position = table
      .get(row_index as usize)
      .copied()
      .ok_or_else(|| CoreError::InvalidArg(format!("row index out of range: {row_index}")))?;
    self.decode_at(entry, row_index, position, None)
  }
}

fn nz(n: usize) -> std::num::NonZeroUsize {
  std::num::NonZeroUsize::new(n.max(1)).unwrap()
}

fn decode_record_bytes(
  handle: &Arc<Mutex<File>>,
  entry: &CatalogEntry,
  position: u64,
) -> Result<Vec<(String, FieldValue)>, CoreError> {
  match entry.format {
    FileFormat::Csv => decode_csv(handle, entry, position),
    FileFormat::Ndjson => decode_ndjson(handle, entry, position),
    FileFormat::JsonArray => decode_json_array(handle, entry, position),
    FileFormat::Vcard => decode_vcard(handle, entry, position),
  }
}

/// Grow a read buffer from `start` until `extract` returns `Some`, or until
/// reaching EOF / `GROW_MAX`. `extract` is re-run against the whole buffer
/// each time more bytes arrive, since a line or object boundary may fall
/// just past the previous read.
fn grow_read<T>(
  handle: &Arc<Mutex<File>>,
  start: u64,
  mut extract: impl FnMut(&[u8], bool) -> Option<T>,
) -> Result<T, CoreError> {
  let mut file = handle.lock();
  file.seek(SeekFrom::Start(start))?;
  let mut buf = Vec::new();
  let mut chunk = vec![0u8; GROW_START];
  loop {
    let n = file.read(&mut chunk)?;
    let eof = n == 0;
    if n > 0 {
      buf.extend_from_slice(&chunk[..n]);
    }
    if let Some(value) = extract(&buf, eof) {
      return Ok(value);
    }
    if eof || buf.len() >= GROW_MAX {
      return Err(CoreError::Invariant(format!("could not decode record at offset {start}")));
    }
  }
}

fn line_at(buf: &[u8], eof: bool) -> Option<&[u8]> {
  match memchr::memchr(b'\n', buf) {
    Some(idx) => Some(&buf[..idx]),
    None if eof => Some(buf),
    None => None,
  }
}

fn decode_csv(handle: &Arc<Mutex<File>>, entry: &CatalogEntry, position: u64) -> Result<Vec<(String, FieldValue)>, CoreError> {
  let delimiter = entry.delimiter.unwrap_or(',');
  let line = grow_read(handle, position, |buf, eof| line_at(buf, eof).map(|l| l.to_vec()))?;
  let line = crate::formats::trim_cr(&line);
  let fields = csv::parse_fields(line, delimiter).map_err(CoreError::Invariant)?;
  Ok(zip_columns(
    &entry.columns,
    fields
      .into_iter()
      .map(|f| if f.is_empty() { None } else { Some(FieldValue::Str(f)) }),
  ))
}

fn decode_ndjson(handle: &Arc<Mutex<File>>, entry: &CatalogEntry, position: u64) -> Result<Vec<(String, FieldValue)>, CoreError> {
  let line = grow_read(handle, position, |buf, eof| line_at(buf, eof).map(|l| l.to_vec()))?;
  let line = crate::formats::trim_cr(&line);
  let value: serde_json::Value =
    serde_json::from_slice(line).map_err(|e| CoreError::Invariant(format!("malformed ndjson record: {e}")))?;
  let obj = value
    .as_object()
    .ok_or_else(|| CoreError::Invariant("ndjson record is not an object".into()))?;
  Ok(zip_columns(
    &entry.columns,
    entry.columns.iter().map(|c| obj.get(c).map(json_to_field)),
  ))
}

fn decode_json_array(handle: &Arc<Mutex<File>>, entry: &CatalogEntry, position: u64) -> Result<Vec<(String, FieldValue)>, CoreError> {
  let bytes = grow_read(handle, position, |buf, _eof| {
    crate::formats::json_array::scan_object(buf).map(|len| buf[..len].to_vec())
  })?;
  let value: serde_json::Value =
    serde_json::from_slice(&bytes).map_err(|e| CoreError::Invariant(format!("malformed json record: {e}")))?;
  let obj = value
    .as_object()
    .ok_or_else(|| CoreError::Invariant("json-array record is not an object".into()))?;
  Ok(zip_columns(
    &entry.columns,
    entry.columns.iter().map(|c| obj.get(c).map(json_to_field)),
  ))
}

fn decode_vcard(handle: &Arc<Mutex<File>>, entry: &CatalogEntry, position: u64) -> Result<Vec<(String, FieldValue)>, CoreError> {
  let bytes = grow_read(handle, position, |buf, eof| {
    let mut seen_end = false;
    let mut consumed = 0usize;
    let mut scanned = 0usize;
    while let Some(rel) = memchr::memchr(b'\n', &buf[scanned..]) {
      let idx = scanned + rel;
      let line = crate::formats::trim_cr(&buf[scanned..idx]);
      scanned = idx + 1;
      if std::str::from_utf8(line).unwrap_or("").trim().eq_ignore_ascii_case("END:VCARD") {
        seen_end = true;
        consumed = scanned;
        break;
      }
    }
    if seen_end {
      Some(buf[..consumed].to_vec())
    } else if eof {
      Some(buf.to_vec())
    } else {
      None
    }
  })?;

  let mut acc = vcard::VcardAccumulator::default();
  for raw_line in bytes.split(|&b| b == b'\n') {
    let line = crate::formats::trim_cr(raw_line);
    if line.is_empty() {
      continue;
    }
    let trimmed = std::str::from_utf8(line).unwrap_or("").trim();
    if trimmed.eq_ignore_ascii_case("BEGIN:VCARD") || trimmed.eq_ignore_ascii_case("END:VCARD") {
      continue;
    }
    acc.add_line(line);
  }
  let values = acc.to_values();
  Ok(zip_columns(&entry.columns, values.into_iter()))
}

fn zip_columns(
  columns: &[String],
  values: impl Iterator<Item = Option<FieldValue>>,
) -> Vec<(String, FieldValue)> {
  columns
    .iter()
    .cloned()
    .zip(values)
    .map(|(name, value)| (name, value.unwrap_or(FieldValue::Null)))
    .collect()
}

