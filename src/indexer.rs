//! Index Writer (C4): drives one format parser end to end, persisting the
//! position table, catalog row, stats row and secondary-index rows for a
//! single indexing job inside one transaction. Committed only if every
//! write and the whole parse succeeds; dropped (auto-rollback) otherwise.

use std::{
  fs,
  path::Path,
  sync::atomic::AtomicBool,
  time::{SystemTime, UNIX_EPOCH},
};

use tracing::debug;

use crate::{
  engine::{CoreError, CoreOptions},
  formats::{self, csv, json_array, ndjson, vcard, ParsedRecord},
  models::{CatalogEntry, FileFormat},
  position::PositionTableWriter,
  stats::StatsAccumulator,
  storage::{self, Storage},
};

pub(crate) struct IndexOutcome {
  pub total_records: u64,
  pub warnings: u64,
}

pub(crate) fn run(
  storage: &Storage,
  options: &CoreOptions,
  file_id: &str,
  path: &Path,
  size: u64,
  mtime_ms: i64,
  cancelled: &AtomicBool,
  mut on_progress: impl FnMut(u8, u64, u64),
) -> Result<IndexOutcome, CoreError> {
  let indexes_dir = storage.indexes_dir();
  fs::create_dir_all(&indexes_dir)?;
  let tmp_position_path = indexes_dir.join(format!("{file_id}.index.bin.tmp"));
  let final_position_path = indexes_dir.join(format!("{file_id}.index.bin"));

  let result = run_inner(
    storage,
    options,
    file_id,
    path,
    size,
    mtime_ms,
    cancelled,
    &tmp_position_path,
    &mut on_progress,
  );

  if result.is_err() {
    let _ = fs::remove_file(&tmp_position_path);
  } else {
    fs::rename(&tmp_position_path, &final_position_path)?;
  }

  result
}

#[allow(clippy::too_many_arguments)]
fn run_inner(
  storage: &Storage,
  options: &CoreOptions,
  file_id: &str,
  path: &Path,
  size: u64,
  mtime_ms: i64,
  cancelled: &AtomicBool,
  tmp_position_path: &Path,
  on_progress: &mut impl FnMut(u8, u64, u64),
) -> Result<IndexOutcome, CoreError> {
  let head = formats::read_head(path, 4096)?;
  let (format, delimiter) = formats::sniff(path, &head);

  let mut conn = storage.open()?;
  let tx = conn.transaction().map_err(|e| CoreError::Storage(e.to_string()))?;
  storage::delete_file_rows(&tx, file_id).map_err(|e| CoreError::Storage(e.to_string()))?;

  let mut writer = PositionTableWriter::create(tmp_position_path)?;
  let mut stats_acc: Option<StatsAccumulator> = None;
  let mut row_index: u64 = 0;
  let mut first_error: Option<CoreError> = None;

  let mut on_record = |record: ParsedRecord| {
    if first_error.is_some() {
      return;
    }
    let outcome: Result<(), CoreError> = (|| {
      writer.push(record.offset)?;
      if stats_acc.is_none() {
        let placeholder: Vec<String> = (0..record.values.len()).map(|i| format!("col{i}")).collect();
        stats_acc = Some(StatsAccumulator::new(
          &placeholder,
          options.stats_columns,
          options.stats_distinct_cap,
          options.stats_top_n,
        ));
      }
      if let Some(acc) = stats_acc.as_mut() {
        acc.observe(&record.values);
      }

      let mut projections: [Option<String>; 6] = Default::default();
      for (slot, value) in projections.iter_mut().zip(record.values.iter()) {
        *slot = value.as_ref().and_then(|v| v.projection());
      }
      storage::insert_search_row(&tx, file_id, row_index, record.offset, &projections)
        .map_err(|e| CoreError::Storage(e.to_string()))?;
      row_index += 1;
      Ok(())
    })();
    if let Err(e) = outcome {
      first_error = Some(e);
    }
  };

  let parse_outcome = match format {
    FileFormat::Csv => csv::parse(
      path,
      delimiter.unwrap_or(','),
      options.chunk_bytes,
      options.progress_interval_ms,
      cancelled,
      |p, r, e| on_progress(p, r, e),
      &mut on_record,
    ),
    FileFormat::Ndjson => ndjson::parse(
      path,
      options.chunk_bytes,
      options.progress_interval_ms,
      cancelled,
      |p, r, e| on_progress(p, r, e),
      &mut on_record,
    ),
    FileFormat::JsonArray => json_array::parse(
      path,
      options.chunk_bytes,
      options.progress_interval_ms,
      cancelled,
      |p, r, e| on_progress(p, r, e),
      &mut on_record,
    ),
    FileFormat::Vcard => vcard::parse(
      path,
      options.chunk_bytes,
      options.progress_interval_ms,
      cancelled,
      |p, r, e| on_progress(p, r, e),
      &mut on_record,
    ),
  }?;

  drop(on_record);
  if let Some(e) = first_error {
    return Err(e);
  }

  let total_records = writer.finish()?;
  debug!(file_id, total_records, warnings = parse_outcome.warnings.len(), "parse finished");

  let declared_columns = parse_outcome.declared_columns;
  let searchable_columns: Vec<String> = declared_columns.iter().take(6).cloned().collect();

  if let Some(mut acc) = stats_acc {
    acc.set_names(&declared_columns);
    let stats_result = acc.finish(file_id);
    storage::insert_stats_row(&tx, file_id, &stats_result).map_err(|e| CoreError::Storage(e.to_string()))?;
  }

  let entry = CatalogEntry {
    file_id: file_id.to_string(),
    path: path.to_string_lossy().to_string(),
    name: path
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| path.to_string_lossy().to_string()),
    size,
    format,
    delimiter,
    indexed_at_ms: now_ms(),
    total_records,
    columns: declared_columns,
    searchable_columns,
  };
  storage::insert_catalog_row(&tx, &entry).map_err(|e| CoreError::Storage(e.to_string()))?;

  tx.commit().map_err(|e| CoreError::Storage(e.to_string()))?;
  storage.touch_recent(file_id, now_ms())?;
  let _ = mtime_ms;

  Ok(IndexOutcome {
    total_records,
    warnings: parse_outcome.warnings.len() as u64 + parse_outcome.warnings_dropped,
  })
}

fn now_ms() -> i64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
