use std::{path::PathBuf, thread, time::Duration};

use dh_core::{CoreEngine, CoreOptions, JobState, StorageOptions};

fn main() -> Result<(), String> {
  let path = std::env::args()
    .nth(1)
    .ok_or_else(|| "usage: cargo run -p dh_core --example smoke_full_raw -- <path-to-file>".to_string())?;
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
      _ => thread::sleep(Duration::from_millis(100)),
    }
  }

  let record = eng.get_record(&file_id, 0).map_err(|e| e.to_string())?;
  println!("record[0]={:?}", record.fields);

  let stats = eng.stats(&file_id).map_err(|e| e.to_string())?;
  for column in &stats.columns {
    println!(
      "column={} distinct_approx={} top={:?}",
      column.name, column.distinct_approx, column.top_values
    );
  }
  Ok(())
}
