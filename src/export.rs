//! Export: materializes a `page`- or `search`-shaped result set to a CSV or
//! JSON file on disk, paging internally so the whole result set is never
//! held in memory at once.

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use crate::{
  engine::{CoreEngine, CoreError},
  models::{CatalogEntry, ExportFormat, ExportRequest, ExportResult, Record},
};

const EXPORT_PAGE_SIZE: u64 = 1000;

pub(crate) fn export(
  engine: &CoreEngine,
  entry: &CatalogEntry,
  request: ExportRequest,
  output_path: &Path,
) -> Result<ExportResult, CoreError> {
  let file = File::create(output_path)?;
  let mut out = BufWriter::new(file);

  if request.format == ExportFormat::Csv {
    write_csv_row(&mut out, entry.columns.iter().map(|c| c.as_str()))?;
  } else {
    out.write_all(b"[")?;
  }

  let mut written: u64 = 0;
  let mut page = 1u64;
  'pages: loop {
    let remaining = request.limit.map(|l| l.saturating_sub(written));
    if remaining == Some(0) {
      break;
    }
    let batch_limit = remaining.map(|r| r.min(EXPORT_PAGE_SIZE)).unwrap_or(EXPORT_PAGE_SIZE);

    let records = fetch_page(engine, &entry.file_id, &request, page, batch_limit)?;
    if records.is_empty() {
      break;
    }
    let batch_len = records.len() as u64;

    for record in &records {
      if request.format == ExportFormat::Csv {
        let values: Vec<String> = entry.columns.iter().map(|col| field_text(record, col)).collect();
        write_csv_row(&mut out, values.iter().map(|s| s.as_str()))?;
      } else {
        if written > 0 {
          out.write_all(b",")?;
        }
        serde_json::to_writer(&mut out, record).map_err(|e| CoreError::Invariant(e.to_string()))?;
      }
      written += 1;
      if request.limit.is_some_and(|l| written >= l) {
        break 'pages;
      }
    }

    if batch_len < batch_limit {
      break;
    }
    page += 1;
  }

  if request.format == ExportFormat::Json {
    out.write_all(b"]")?;
  }
  out.flush()?;

  Ok(ExportResult {
    output_path: output_path.to_string_lossy().to_string(),
    records_written: written,
  })
}

fn fetch_page(
  engine: &CoreEngine,
  file_id: &str,
  request: &ExportRequest,
  page: u64,
  limit: u64,
) -> Result<Vec<Record>, CoreError> {
  if let Some(search) = &request.search {
    let mut query = search.clone();
    query.page = page;
    query.limit = limit;
    Ok(engine.search(file_id, query)?.records)
  } else {
    Ok(engine.page(file_id, page, limit, request.filters.clone())?.records)
  }
}

fn field_text(record: &Record, column: &str) -> String {
  record
    .fields
    .iter()
    .find(|(k, _)| k == column)
    .and_then(|(_, v)| v.display_string())
    .unwrap_or_default()
}

fn csv_escape(value: &str) -> String {
  if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
    format!("\"{}\"", value.replace('"', "\"\""))
  } else {
    value.to_string()
  }
}

fn write_csv_row<'a>(out: &mut impl Write, fields: impl Iterator<Item = &'a str>) -> Result<(), CoreError> {
  let line = fields.map(csv_escape).collect::<Vec<_>>().join(",");
  writeln!(out, "{line}")?;
  Ok(())
}
