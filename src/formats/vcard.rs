//! vCard streaming parser. Line-oriented: a record spans from a line equal
//! to `BEGIN:VCARD` (trimmed) to the matching `END:VCARD`. Declared columns
//! are the fixed canonical list below regardless of what the source
//! actually populates; searchable columns are its first six.
//!
//! Continuation lines (next line starts with space or tab) are appended
//! verbatim — including the leading whitespace byte — to the previous
//! property's value. This departs from RFC 6350 unfolding (which drops that
//! byte) but matches this engine's documented worked example where a folded
//! `FN:Al` / ` Pha` pair decodes to `"Al Pha"`, not `"AlPha"`; see
//! DESIGN.md.

use std::{collections::HashMap, path::Path, sync::atomic::AtomicBool};

use crate::{
  engine::CoreError,
  formats::{for_each_line, trim_cr, ChunkDriver, ParseOutcome, ParsedRecord, ProgressEmitter},
  models::FieldValue,
};

pub(crate) const CANONICAL_COLUMNS: [&str; 10] =
  ["FN", "N", "EMAIL", "TEL", "ORG", "ADR", "NOTE", "URL", "BDAY", "TITLE"];

const MULTI_VALUED: [&str; 2] = ["EMAIL", "TEL"];

#[derive(Default)]
pub(crate) struct VcardAccumulator {
  singles: HashMap<String, String>,
  multi: HashMap<String, Vec<String>>,
  last_key: Option<String>,
  last_is_multi: bool,
}

impl VcardAccumulator {
  fn reset(&mut self) {
    self.singles.clear();
    self.multi.clear();
    self.last_key = None;
    self.last_is_multi = false;
  }

  /// Feed one unfolded-at-the-newline-only line (already `\r`-stripped).
  pub(crate) fn add_line(&mut self, line: &[u8]) {
    if let Some(&first) = line.first() {
      if first == b' ' || first == b'\t' {
        let text = String::from_utf8_lossy(line).into_owned();
        if let Some(key) = self.last_key.clone() {
          if self.last_is_multi {
            if let Some(v) = self.multi.get_mut(&key).and_then(|v| v.last_mut()) {
              v.push_str(&text);
            }
          } else if let Some(v) = self.singles.get_mut(&key) {
            v.push_str(&text);
          }
        }
        return;
      }
    }

    let text = String::from_utf8_lossy(line).into_owned();
    let Some(colon) = text.find(':') else {
      return;
    };
    let prop_part = &text[..colon];
    let value = text[colon + 1..].to_string();
    let key = prop_part.split(';').next().unwrap_or("").trim().to_ascii_uppercase();

    if key == "BEGIN" || key == "END" || key == "VERSION" {
      self.last_key = None;
      return;
    }

    if MULTI_VALUED.contains(&key.as_str()) {
      self.multi.entry(key.clone()).or_default().push(value);
      self.last_key = Some(key);
      self.last_is_multi = true;
    } else {
      self.singles.entry(key.clone()).or_insert(value);
      self.last_key = Some(key);
      self.last_is_multi = false;
    }
  }

  pub(crate) fn value_for(&self, column: &str) -> Option<FieldValue> {
    if MULTI_VALUED.contains(&column) {
      self.multi.get(column).map(|v| FieldValue::Str(v.join(", ")))
    } else {
      self.singles.get(column).map(|v| FieldValue::Str(v.clone()))
    }
  }

  pub(crate) fn to_values(&self) -> Vec<Option<FieldValue>> {
    CANONICAL_COLUMNS.iter().map(|c| self.value_for(c)).collect()
  }
}

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

  let mut total_records: u64 = 0;
  let mut in_record = false;
  let mut record_start: u64 = 0;
  let mut acc = VcardAccumulator::default();

  for_each_line(
    path,
    &driver,
    |bytes_done| {
      let p = emitter.sample(bytes_done, total_records);
      on_progress(p.percent, p.records_so_far, p.eta_secs);
    },
    |line_start, raw_line| {
      let line = trim_cr(raw_line);
      let trimmed = std::str::from_utf8(line).unwrap_or("").trim();

      if trimmed.eq_ignore_ascii_case("BEGIN:VCARD") {
        in_record = true;
        record_start = line_start;
        acc.reset();
        return Ok(());
      }
      if !in_record {
        return Ok(());
      }
      if trimmed.eq_ignore_ascii_case("END:VCARD") {
        on_record(ParsedRecord { offset: record_start, values: acc.to_values() });
        total_records += 1;
        in_record = false;
        return Ok(());
      }
      acc.add_line(line);
      Ok(())
    },
  )?;

  // A final record with no trailing END:VCARD still spans to EOF, matching
  // the same "no trailing newline/marker" tolerance as the other formats.
  if in_record {
    on_record(ParsedRecord { offset: record_start, values: acc.to_values() });
    total_records += 1;
  }

  let last = emitter.finish(total_records);
  on_progress(last.percent, last.records_so_far, last.eta_secs);

  Ok(ParseOutcome {
    declared_columns: CANONICAL_COLUMNS.iter().map(|s| s.to_string()).collect(),
    total_records,
    warnings: Vec::new(),
    warnings_dropped: 0,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use tempfile::tempdir;

  fn run(contents: &str) -> (ParseOutcome, Vec<ParsedRecord>) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("in.vcf");
    std::fs::write(&path, contents).unwrap();
    let cancelled = AtomicBool::new(false);
    let mut records = Vec::new();
    let outcome = parse(&path, 64, 0, &cancelled, |_, _, _| {}, |r| records.push(r)).unwrap();
    (outcome, records)
  }

  #[test]
  fn continuation_and_multi_email() {
    let src = "BEGIN:VCARD\nFN:Al\n Pha\nEMAIL:a@x\nEMAIL:b@y\nEND:VCARD\n";
    let (outcome, records) = run(src);
    assert_eq!(outcome.total_records, 1);
    assert_eq!(records.len(), 1);
    let fn_idx = CANONICAL_COLUMNS.iter().position(|c| *c == "FN").unwrap();
    let email_idx = CANONICAL_COLUMNS.iter().position(|c| *c == "EMAIL").unwrap();
    assert_eq!(records[0].values[fn_idx], Some(FieldValue::Str("Al Pha".to_string())));
    assert_eq!(records[0].values[email_idx], Some(FieldValue::Str("a@x, b@y".to_string())));
  }

  #[test]
  fn multiple_records_have_increasing_offsets() {
    let src = "BEGIN:VCARD\nFN:A\nEND:VCARD\nBEGIN:VCARD\nFN:B\nEND:VCARD\n";
    let (_, records) = run(src);
    assert_eq!(records.len(), 2);
    assert!(records[0].offset < records[1].offset);
  }

  #[test]
  fn missing_terminal_end_marker_still_emits_record() {
    let src = "BEGIN:VCARD\nFN:Truncated";
    let (outcome, records) = run(src);
    assert_eq!(outcome.total_records, 1);
    assert_eq!(records.len(), 1);
  }

  #[test]
  fn lines_before_first_begin_are_ignored() {
    let src = "garbage\nBEGIN:VCARD\nFN:A\nEND:VCARD\n";
    let (_, records) = run(src);
    assert_eq!(records.len(), 1);
  }
}
