//! JSON-array streaming parser. Tracks a byte-level `{depth, in_string,
//! escape_next}` state machine rather than scanning lines, since a single
//! record may itself contain embedded newlines. A record begins at the
//! offset of a `{` seen while directly inside the outer array (depth == 1
//! relative to that `{`) and ends at the matching `}`; braces and brackets
//! inside quoted strings never affect depth, and an escaped quote never
//! closes a string early.

use std::{
  fs::File,
  io::Read,
  path::Path,
  sync::atomic::{AtomicBool, Ordering},
  time::Instant,
};

use serde_json::Value;

use crate::{
  engine::CoreError,
  formats::{declared_columns_from_object, json_to_field, ChunkDriver, ParseOutcome, ParsedRecord, ProgressEmitter},
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

  let mut file = File::open(path)?;
  let mut chunk = vec![0u8; driver.chunk_bytes];
  let mut last_progress = Instant::now();

  let mut declared: Vec<String> = Vec::new();
  let mut total_records: u64 = 0;

  let mut array_entered = false;
  let mut in_record = false;
  let mut depth: i64 = 0;
  let mut in_string = false;
  let mut escape = false;
  let mut buf: Vec<u8> = Vec::new();
  let mut record_start: u64 = 0;
  let mut abs: u64 = 0;
  let mut done = false;

  loop {
    if driver.is_cancelled() {
      return Err(CoreError::Cancelled);
    }
    let n = file.read(&mut chunk)?;
    if n == 0 {
      break;
    }
    for &b in &chunk[..n] {
      let pos = abs;
      abs += 1;
      if done {
        continue;
      }

      if in_string {
        if in_record {
          buf.push(b);
        }
        if escape {
          escape = false;
        } else if b == b'\\' {
          escape = true;
        } else if b == b'"' {
          in_string = false;
        }
        continue;
      }

      match b {
        b'"' => {
          in_string = true;
          if in_record {
            buf.push(b);
          }
        }
        b'[' if !array_entered => {
          array_entered = true;
        }
        b'{' if array_entered && !in_record => {
          in_record = true;
          depth = 1;
          record_start = pos;
          buf.clear();
          buf.push(b);
        }
        b'{' | b'[' if in_record => {
          depth += 1;
          buf.push(b);
        }
        b'}' | b']' if in_record => {
          depth -= 1;
          buf.push(b);
          if depth == 0 {
            if let Ok(Value::Object(obj)) = serde_json::from_slice::<Value>(&buf) {
              if declared.is_empty() {
                declared = declared_columns_from_object(&obj);
              }
              let values = declared.iter().map(|col| obj.get(col).map(json_to_field)).collect();
              on_record(ParsedRecord { offset: record_start, values });
              total_records += 1;
            }
            in_record = false;
          }
        }
        b']' if array_entered => {
          done = true;
        }
        _ => {}
      }
    }

    if last_progress.elapsed().as_millis() as u64 >= driver.progress_interval_ms {
      let p = emitter.sample(abs, total_records);
      on_progress(p.percent, p.records_so_far, p.eta_secs);
      last_progress = Instant::now();
    }
  }

  let last = emitter.finish(total_records);
  on_progress(last.percent, last.records_so_far, last.eta_secs);

  Ok(ParseOutcome {
    declared_columns: declared,
    total_records,
    warnings: Vec::new(),
    warnings_dropped: 0,
  })
}

/// Scan a byte slice starting at `bytes[0] == b'{'` for the matching close
/// brace, honoring string/escape state. Returns the length consumed
/// (including the closing `}`), or `None` if the slice ends before the
/// object closes. Shared with the record reader so a single scanner
/// implementation backs both indexing and random-access decode.
pub(crate) fn scan_object(bytes: &[u8]) -> Option<usize> {
  let mut depth: i64 = 0;
  let mut in_string = false;
  let mut escape = false;

  for (i, &b) in bytes.iter().enumerate() {
    if in_string {
      if escape {
        escape = false;
      } else if b == b'\\' {
        escape = true;
      } else if b == b'"' {
        in_string = false;
      }
      continue;
    }
    match b {
      b'"' => in_string = true,
      b'{' | b'[' => depth += 1,
      b'}' | b']' => {
        depth -= 1;
        if depth == 0 {
          return Some(i + 1);
        }
      }
      _ => {}
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::FieldValue;
  use std::sync::atomic::AtomicBool;
  use tempfile::tempdir;

  fn run(contents: &str) -> (ParseOutcome, Vec<ParsedRecord>) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.json");
    std::fs::write(&path, contents).unwrap();
    let cancelled = AtomicBool::new(false);
    let mut records = Vec::new();
    let outcome = parse(&path, 64, 0, &cancelled, |_, _, _| {}, |r| records.push(r)).unwrap();
    (outcome, records)
  }

  #[test]
  fn finds_records_and_declared_columns() {
    let (outcome, records) = run(r#"[{"u":"al","n":1},{"u":"bo","n":2}]"#);
    assert_eq!(outcome.declared_columns, vec!["u", "n"]);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].values[1], Some(FieldValue::Int(1)));
  }

  #[test]
  fn escaped_braces_in_strings_do_not_affect_depth() {
    let src = r#"[ {"s":"a}b","n":1}, {"s":"{","n":2} ]"#;
    let (_, records) = run(src);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].values[0], Some(FieldValue::Str("a}b".to_string())));
    assert_eq!(records[1].values[0], Some(FieldValue::Str("{".to_string())));
    let true_first_brace = src.find('{').unwrap() as u64;
    assert_eq!(records[0].offset, true_first_brace);
  }

  #[test]
  fn empty_array_yields_no_records() {
    let (outcome, records) = run("[]");
    assert_eq!(outcome.total_records, 0);
    assert!(records.is_empty());
  }

  #[test]
  fn scan_object_finds_matching_close_across_nesting_and_strings() {
    let bytes = br#"{"a":{"b":1},"c":"}"}rest"#;
    let len = scan_object(bytes).unwrap();
    assert_eq!(&bytes[..len], br#"{"a":{"b":1},"c":"}"}"#);
  }
}
