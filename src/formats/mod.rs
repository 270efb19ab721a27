use std::{
  fs::File,
  io::Read,
  path::Path,
  sync::atomic::{AtomicBool, Ordering},
  time::Instant,
};

use serde_json::Value;

use crate::{engine::CoreError, models::FieldValue};

pub(crate) mod csv;
pub(crate) mod json_array;
pub(crate) mod ndjson;
pub(crate) mod vcard;

pub(crate) const MAX_DECLARED_COLUMNS: usize = 20;

/// Declared columns are a decoded object's top-level keys whose values are
/// null, primitive, or array; object-valued keys are excluded. Shared by the
/// NDJSON and JSON-array variants, which use the same "first successful
/// decode wins" inference rule.
pub(crate) fn declared_columns_from_object(obj: &serde_json::Map<String, Value>) -> Vec<String> {
  obj
    .iter()
    .filter(|(_, v)| !v.is_object())
    .map(|(k, _)| k.clone())
    .take(MAX_DECLARED_COLUMNS)
    .collect()
}

/// Convert a decoded JSON value into the engine's tagged `FieldValue`.
/// Arrays are serialized back to a JSON string; objects are never passed in
/// (callers drop object-valued fields before reaching here).
pub(crate) fn json_to_field(value: &Value) -> FieldValue {
  match value {
    Value::Null => FieldValue::Null,
    Value::Bool(b) => FieldValue::Bool(*b),
    Value::Number(n) => {
      if let Some(i) = n.as_i64() {
        FieldValue::Int(i)
      } else {
        FieldValue::Float(n.as_f64().unwrap_or(0.0))
      }
    }
    Value::String(s) => FieldValue::Str(s.clone()),
    Value::Array(_) | Value::Object(_) => {
      FieldValue::Json(serde_json::to_string(value).unwrap_or_default())
    }
  }
}

pub(crate) use crate::models::FileFormat;

/// Classify a source from a small header peek + the path's extension.
pub(crate) fn sniff(path: &Path, head: &[u8]) -> (FileFormat, Option<char>) {
  let ext = path
    .extension()
    .and_then(|s| s.to_str())
    .unwrap_or("")
    .to_ascii_lowercase();

  if ext == "vcf" {
    return (FileFormat::Vcard, None);
  }
  if ext == "json" {
    let first_non_ws = head.iter().find(|b| !b.is_ascii_whitespace()).copied();
    return if first_non_ws == Some(b'[') {
      (FileFormat::JsonArray, None)
    } else {
      (FileFormat::Ndjson, None)
    };
  }

  let first_line_end = memchr::memchr(b'\n', head).unwrap_or(head.len());
  let first_line = &head[..first_line_end];
  let candidates = [b',', b';', b'\t', b'|'];
  let mut best = (b',', 0usize);
  for c in candidates {
    let count = first_line.iter().filter(|&&b| b == c).count();
    if count > best.1 {
      best = (c, count);
    }
  }
  let delimiter = if best.1 == 0 { ',' } else { best.0 as char };
  (FileFormat::Csv, Some(delimiter))
}

/// Read up to `n` bytes from the start of a file, for sniffing.
pub(crate) fn read_head(path: &Path, n: usize) -> Result<Vec<u8>, CoreError> {
  let mut file = File::open(path)?;
  let mut buf = vec![0u8; n];
  let mut total = 0usize;
  loop {
    let read = file.read(&mut buf[total..])?;
    if read == 0 {
      break;
    }
    total += read;
    if total == buf.len() {
      break;
    }
  }
  buf.truncate(total);
  Ok(buf)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ParseProgress {
  pub percent: u8,
  pub records_so_far: u64,
  pub eta_secs: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct ParseWarning {
  pub offset: u64,
  pub message: String,
}

/// One discovered record: its start offset plus decoded values aligned to
/// the final declared-column list (established on the first successfully
/// parsed record for NDJSON/JSON-array, on the header row for CSV, or fixed
/// for vCard).
#[derive(Debug, Clone)]
pub(crate) struct ParsedRecord {
  pub offset: u64,
  pub values: Vec<Option<FieldValue>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ParseOutcome {
  pub declared_columns: Vec<String>,
  pub total_records: u64,
  pub warnings: Vec<ParseWarning>,
  pub warnings_dropped: u64,
}

const MAX_TRACKED_WARNINGS: usize = 1000;

pub(crate) struct WarningSink {
  pub warnings: Vec<ParseWarning>,
  pub dropped: u64,
}

impl WarningSink {
  fn new() -> Self {
    Self { warnings: Vec::new(), dropped: 0 }
  }

  pub(crate) fn push(&mut self, offset: u64, message: impl Into<String>) {
    if self.warnings.len() < MAX_TRACKED_WARNINGS {
      self.warnings.push(ParseWarning { offset, message: message.into() });
    } else {
      self.dropped += 1;
    }
  }
}

/// Drives every format-specific parser: handles cancellation checks, wall
/// clock progress throttling (every `progress_interval_ms`), and a fixed
/// chunk size so the full file is never materialized in memory.
pub(crate) struct ChunkDriver<'a> {
  pub chunk_bytes: usize,
  pub progress_interval_ms: u64,
  pub cancelled: &'a AtomicBool,
}

impl<'a> ChunkDriver<'a> {
  pub(crate) fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Relaxed)
  }
}

/// Shared line-oriented chunked scanner used by CSV, NDJSON and vCard.
///
/// Reads the file in fixed-size chunks, carrying any trailing partial line
/// across chunk boundaries in a leftover buffer so a line scan is never
/// truncated mid-record. Calls `on_line(line_start_offset, line_bytes)` for
/// every complete line (trailing `\n` stripped; trailing `\r` is left for the
/// caller to strip, since CSV/vCard/NDJSON each decide that independently).
/// The final, possibly-unterminated trailing line is delivered too.
pub(crate) fn for_each_line(
  path: &Path,
  driver: &ChunkDriver,
  mut on_progress: impl FnMut(u64),
  mut on_line: impl FnMut(u64, &[u8]) -> Result<(), CoreError>,
) -> Result<(), CoreError> {
  let mut file = File::open(path)?;
  let total = file.metadata().map(|m| m.len()).unwrap_or(0);

  let mut leftover: Vec<u8> = Vec::new();
  let mut base_offset: u64 = 0;
  let mut bytes_done: u64 = 0;
  let mut last_progress = Instant::now();
  let mut chunk = vec![0u8; driver.chunk_bytes];

  loop {
    if driver.is_cancelled() {
      return Err(CoreError::Cancelled);
    }

    let n = file.read(&mut chunk)?;
    if n == 0 {
      if !leftover.is_empty() {
        on_line(base_offset, &leftover)?;
      }
      on_progress(total);
      break;
    }
    leftover.extend_from_slice(&chunk[..n]);
    bytes_done += n as u64;

    let mut scanned = 0usize;
    while let Some(rel) = memchr::memchr(b'\n', &leftover[scanned..]) {
      let idx = scanned + rel;
      let line_start = base_offset + scanned as u64;
      on_line(line_start, &leftover[scanned..idx])?;
      scanned = idx + 1;

      if driver.is_cancelled() {
        return Err(CoreError::Cancelled);
      }
    }

    if scanned > 0 {
      base_offset += scanned as u64;
      leftover.drain(0..scanned);
    }

    if last_progress.elapsed().as_millis() as u64 >= driver.progress_interval_ms {
      on_progress(bytes_done);
      last_progress = Instant::now();
    }
  }

  Ok(())
}

pub(crate) fn trim_cr(line: &[u8]) -> &[u8] {
  if line.ends_with(b"\r") {
    &line[..line.len() - 1]
  } else {
    line
  }
}

/// Turns raw `(bytes_done, records_so_far)` samples into the `(percent,
/// records_so_far, eta)` triple the coordinator reports to callers, matching
/// the monotonic-percent / zero-eta-at-completion rule.
pub(crate) struct ProgressEmitter {
  total_bytes: u64,
  started_at: Instant,
  last_percent: u8,
}

impl ProgressEmitter {
  pub(crate) fn new(total_bytes: u64) -> Self {
    Self { total_bytes, started_at: Instant::now(), last_percent: 0 }
  }

  pub(crate) fn sample(&mut self, bytes_done: u64, records_so_far: u64) -> ParseProgress {
    let bytes_done = bytes_done.min(self.total_bytes.max(bytes_done));
    let percent = if self.total_bytes == 0 {
      100
    } else {
      ((bytes_done.saturating_mul(100)) / self.total_bytes).min(100) as u8
    };
    let percent = percent.max(self.last_percent);
    self.last_percent = percent;

    let elapsed = self.started_at.elapsed().as_secs_f64().max(0.001);
    let rate = bytes_done as f64 / elapsed;
    let remaining = self.total_bytes.saturating_sub(bytes_done) as f64;
    let eta_secs = if rate > 0.0 { (remaining / rate).round() as u64 } else { 0 };

    ParseProgress { percent, records_so_far, eta_secs }
  }

  pub(crate) fn finish(&mut self, records_so_far: u64) -> ParseProgress {
    self.last_percent = 100;
    ParseProgress { percent: 100, records_so_far, eta_secs: 0 }
  }
}
