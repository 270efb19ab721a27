use std::{collections::BTreeMap, path::PathBuf, thread, time::Duration};

use dh_core::{CoreEngine, CoreOptions, JobState, StorageOptions};

fn main() -> Result<(), String> {
  let path = std::env::args()
    .nth(1)
    .ok_or_else(|| "usage: cargo run -p dh_core --example smoke_open -- <path-to-file>".to_string())?;
  let path = PathBuf::from(path);

  let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
  let eng = CoreEngine::new(CoreOptions {
    storage: StorageOptions { data_dir: Some(dir.path().join("data")) },
    ..CoreOptions::default()
  })
  .map_err(|e| e.to_string())?;

  let file_id = eng.start_index(&path).map_err(|e| e.to_string())?;
  loop {
    let status = eng.index_status(&file_id).map_err(|e| e.to_string())?;
    match status.state {
      JobState::Complete => break,
      JobState::Error => return Err(status.error.unwrap_or_default()),
      JobState::Cancelled => return Err("indexing was cancelled".to_string()),
      _ => {
        println!("indexing... {}% ({} records so far)", status.percent, status.records_so_far);
        thread::sleep(Duration::from_millis(100));
      }
    }
  }

  let info = eng.open_file_info(&path).map_err(|e| e.to_string())?;
  let entry = info.entry.ok_or("index completed but catalog entry missing")?;
  println!("format={:?}", entry.format);
  println!("total_records={}", entry.total_records);
  println!("columns={:?}", entry.columns);

  let page = eng.page(&file_id, 1, 5, BTreeMap::new()).map_err(|e| e.to_string())?;
  for record in &page.records {
    println!("row {}: {:?}", record.index, record.fields);
  }
  Ok(())
}
