//! Newline-delimited JSON. Each line is an independent JSON value; lines that
//! fail to decode as a JSON object are silently skipped (not counted as
//! warnings — malformed JSON lines are common in hand-edited NDJSON and are
//! not considered exceptional the way a malformed CSV row is).
//!
//! Declared columns are taken from the first object successfully decoded:
//! its top-level keys, in the order serde_json's Map reports them, capped at
//! 20. Later objects that introduce new keys do not widen the column set;
//! later objects missing a declared key just decode to `None` for it.

use std::{path::Path, sync::atomic::AtomicBool};

use serde_json::Value;

use crate::{
  engine::CoreError,
  formats::{
    declared_columns_from_object, for_each_line, json_to_field, trim_cr, ChunkDriver, ParseOutcome,
    ParsedRecord, ProgressEmitter, WarningSink,
  },
};

pub(crate) fn parse(
  path: &Path,
  chunk_bytes: usize,
  progress_interval_ms: u64,
  cancelled: &AtomicBool,
  mut on_progress: impl FnMut(u8, u64, u64),
  mut on_record: impl FnMut(ParsedRecord),
) -> Result<ParseOutcome, CoreError> {
  let total_bytes = std::fs::metadata(path)?.len();
  let driver = ChunkDriver { chunk_bytes, progress_interval_ms, cancelled };
  let mut emitter = ProgressEmitter::new(total_bytes);
  let warnings = WarningSink::new();

  let mut declared: Vec<String> = Vec::new();
  let mut total_records: u64 = 0;

  for_each_line(
    path,
    &driver,
    |bytes_done| {
      let p = emitter.sample(bytes_done, total_records);
      on_progress(p.percent, p.records_so_far, p.eta_secs);
    },
    |line_start, raw_line| {
      let line = trim_cr(raw_line);
      if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(());
      }
      let Ok(value) = serde_json::from_slice::<Value>(line) else {
        return Ok(());
      };
      let Value::Object(obj) = value else {
        return Ok(());
      };

      if declared.is_empty() {
        declared = declared_columns_from_object(&obj);
      }

      let values = declared
        .iter()
        .map(|col| obj.get(col).map(json_to_field))
        .collect();
      on_record(ParsedRecord { offset: line_start, values });
      total_records += 1;
      Ok(())
    },
  )?;

  let last = emitter.finish(total_records);
  on_progress(last.percent, last.records_so_far, last.eta_secs);

  Ok(ParseOutcome {
    declared_columns: declared,
    total_records,
    warnings: warnings.warnings,
    warnings_dropped: warnings.dropped,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::FieldValue;
  use tempfile::tempdir;

  fn run(contents: &str) -> (ParseOutcome, Vec<ParsedRecord>) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.ndjson");
    std::fs::write(&path, contents).unwrap();
    let cancelled = AtomicBool::new(false);
    let mut records = Vec::new();
    let outcome = parse(&path, 64, 0, &cancelled, |_, _, _| {}, |r| records.push(r)).unwrap();
    (outcome, records)
  }

  #[test]
  fn infers_columns_from_first_object() {
    let (outcome, records) = run("{\"a\":1,\"b\":\"x\"}\n{\"a\":2,\"b\":\"y\",\"c\":3}\n");
    assert_eq!(outcome.declared_columns, vec!["a", "b"]);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].values[0], Some(FieldValue::Int(1)));
  }

  #[test]
  fn object_valued_keys_excluded_from_declared_columns() {
    let (outcome, records) = run("{\"a\":{\"nested\":true},\"b\":[1,2,3]}\n");
    assert_eq!(outcome.declared_columns, vec!["b"]);
    match &records[0].values[0] {
      Some(FieldValue::Json(s)) => assert!(s.contains('1')),
      other => panic!("expected Json variant, got {other:?}"),
    }
  }

  #[test]
  fn skips_malformed_lines_without_warning() {
    let (outcome, records) = run("{\"a\":1}\nnot json\n{\"a\":2}\n");
    assert_eq!(records.len(), 2);
    assert_eq!(outcome.warnings.len(), 0);
  }

  #[test]
  fn skips_non_object_top_level_values() {
    let (_, records) = run("[1,2,3]\n{\"a\":1}\n");
    assert_eq!(records.len(), 1);
  }
}
