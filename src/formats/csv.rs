//! CSV streaming parser. Line-oriented: a record is whatever lies between two
//! `\n` bytes, never a multi-line quoted field. The first line is the header
//! and establishes declared columns; every later line is parsed by a small
//! RFC-4180-style scanner and skipped (with a warning) if it comes out with
//! unbalanced quotes or the wrong number of fields.

use std::{path::Path, sync::atomic::AtomicBool};

use crate::{
  engine::CoreError,
  formats::{for_each_line, trim_cr, ChunkDriver, ParseOutcome, ParsedRecord, ProgressEmitter, WarningSink},
  models::FieldValue,
};

pub(crate) fn parse(
  path: &Path,
  delimiter: char,
  chunk_bytes: usize,
  progress_interval_ms: u64,
  cancelled: &AtomicBool,
  mut on_progress: impl FnMut(u8, u64, u64),
  mut on_record: impl FnMut(ParsedRecord),
) -> Result<ParseOutcome, CoreError> {
  let total_bytes = std::fs::metadata(path)?.len();
  let driver = ChunkDriver { chunk_bytes, progress_interval_ms, cancelled };
  let mut emitter = ProgressEmitter::new(total_bytes);
  let mut warnings = WarningSink::new();

  let mut declared: Vec<String> = Vec::new();
  let mut have_header = false;
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
      if !have_header {
        declared = parse_fields(line, delimiter).unwrap_or_default();
        have_header = true;
        return Ok(());
      }
      match parse_fields(line, delimiter) {
        Ok(fields) if fields.len() == declared.len() => {
          let values = fields
            .into_iter()
            .map(|f| if f.is_empty() { None } else { Some(FieldValue::Str(f)) })
            .collect();
          on_record(ParsedRecord { offset: line_start, values });
          total_records += 1;
        }
        Ok(fields) => {
          warnings.push(
            line_start,
            format!("wrong field count: expected {}, got {}", declared.len(), fields.len()),
          );
        }
        Err(msg) => warnings.push(line_start, msg),
      }
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

/// A single-line RFC-4180-ish field scanner. Whitespace outside quotes at
/// field boundaries is trimmed; `""` inside a quoted field is a literal `"`.
/// A quote left open at end of line is reported as malformed rather than
/// silently closed, since the line-oriented scanner above never sees past it.
pub(crate) fn parse_fields(line: &[u8], delimiter: char) -> Result<Vec<String>, String> {
  let line = String::from_utf8_lossy(line);
  let mut fields = Vec::new();
  let mut cur = String::new();
  let mut in_quotes = false;
  let mut quoted_field = false;
  let mut chars = line.chars().peekable();

  while let Some(ch) = chars.next() {
    if in_quotes {
      if ch == '"' {
        if chars.peek() == Some(&'"') {
          cur.push('"');
          chars.next();
        } else {
          in_quotes = false;
        }
      } else {
        cur.push(ch);
      }
    } else if ch == '"' && cur.trim().is_empty() {
      in_quotes = true;
      quoted_field = true;
      cur.clear();
    } else if ch == delimiter {
      fields.push(if quoted_field { std::mem::take(&mut cur) } else { cur.trim().to_string() });
      cur.clear();
      quoted_field = false;
    } else {
      cur.push(ch);
    }
  }

  if in_quotes {
    return Err("unbalanced quotes".to_string());
  }
  fields.push(if quoted_field { cur } else { cur.trim().to_string() });
  Ok(fields)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use tempfile::tempdir;

  fn run(contents: &str, delimiter: char) -> (ParseOutcome, Vec<ParsedRecord>) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.csv");
    std::fs::write(&path, contents).unwrap();
    let cancelled = AtomicBool::new(false);
    let mut records = Vec::new();
    let outcome = parse(&path, delimiter, 64, 0, &cancelled, |_, _, _| {}, |r| records.push(r)).unwrap();
    (outcome, records)
  }

  #[test]
  fn parses_quoted_and_plain_fields() {
    let (outcome, records) = run("name,email\n\"Doe, John\",a@x\nJane,b@y\n", ',');
    assert_eq!(outcome.declared_columns, vec!["name", "email"]);
    assert_eq!(outcome.total_records, 2);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].values[0], Some(FieldValue::Str("Doe, John".to_string())));
    assert_eq!(records[1].values[0], Some(FieldValue::Str("Jane".to_string())));
    assert!(records[0].offset < records[1].offset);
  }

  #[test]
  fn skips_wrong_arity_lines_as_warnings() {
    let (outcome, records) = run("a,b,c\n1,2,3\n1,2\n4,5,6\n", ',');
    assert_eq!(outcome.total_records, 2);
    assert_eq!(records.len(), 2);
    assert_eq!(outcome.warnings.len(), 1);
  }

  #[test]
  fn no_trailing_newline_still_emits_final_record() {
    let (outcome, records) = run("a,b\n1,2", ',');
    assert_eq!(outcome.total_records, 1);
    assert_eq!(records.len(), 1);
  }

  #[test]
  fn unbalanced_quotes_are_malformed() {
    let (outcome, records) = run("a,b\n\"unterminated,2\n3,4\n", ',');
    assert_eq!(records.len(), 1);
    assert_eq!(outcome.warnings.len(), 1);
  }
}
