use std::{collections::BTreeMap, path::PathBuf, thread, time::Duration};

use dh_core::{
  CoreEngine, CoreOptions, ExportFormat, ExportRequest, FieldValue, JobState, SearchField,
  SearchOperator, SearchQuery, StorageOptions,
};

fn engine_with_data_dir(data_dir: PathBuf) -> CoreEngine {
  CoreEngine::new(CoreOptions {
    storage: StorageOptions { data_dir: Some(data_dir) },
    ..CoreOptions::default()
  })
  .unwrap()
}

fn wait_for_index(eng: &CoreEngine, file_id: &str) {
  for _ in 0..200 {
    let status = eng.index_status(file_id).unwrap();
    match status.state {
      JobState::Complete => return,
      JobState::Error => panic!("index job errored: {:?}", status.error),
      JobState::Cancelled => panic!("index job was cancelled"),
      _ => thread::sleep(Duration::from_millis(10)),
    }
  }
  panic!("index job did not finish in time");
}

fn index_sync(eng: &CoreEngine, path: &std::path::Path) -> String {
  let file_id = eng.start_index(path).unwrap();
  wait_for_index(eng, &file_id);
  file_id
}

fn search_field(column: &str, value: &str, operator: SearchOperator) -> SearchQuery {
  let mut fields = BTreeMap::new();
  fields.insert(column.to_string(), SearchField { value: value.to_string(), operator });
  SearchQuery { fields, exact: false, page: 1, limit: 50 }
}

#[test]
fn csv_with_quotes_and_commas() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("people.csv");
  std::fs::write(&file, "name,email\n\"Doe, John\",a@x\nJane,b@y\n").unwrap();

  let id = index_sync(&eng, &file);
  let info = eng.open_file_info(&file).unwrap();
  assert!(info.indexed);
  let entry = info.entry.unwrap();
  assert_eq!(entry.total_records, 2);
  assert_eq!(entry.columns, vec!["name", "email"]);

  let r0 = eng.get_record(&id, 0).unwrap();
  let name = r0.fields.iter().find(|(k, _)| k == "name").unwrap();
  assert_eq!(name.1, FieldValue::Str("Doe, John".into()));
  assert_eq!(r0.index, 0);

  let res = eng.search(&id, search_field("name", "doe", SearchOperator::Contains)).unwrap();
  assert_eq!(res.total, 1);
  assert_eq!(res.records[0].index, 0);
}

#[test]
fn ndjson_with_nested_objects() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("users.ndjson");
  std::fs::write(&file, "{\"u\":\"al\",\"n\":1,\"meta\":{\"x\":1}}\n{\"u\":\"bo\",\"n\":2}\n").unwrap();

  let id = index_sync(&eng, &file);
  let entry = eng.open_file_info(&file).unwrap().entry.unwrap();
  assert_eq!(entry.columns, vec!["u", "n"]);

  let page = eng.page(&id, 1, 10, BTreeMap::new()).unwrap();
  assert_eq!(page.total, 2);
  let ids: Vec<u64> = page.records.iter().map(|r| r.index).collect();
  assert_eq!(ids, vec![0, 1]);

  let mut filters = BTreeMap::new();
  filters.insert("u".to_string(), "bo".to_string());
  let filtered = eng.page(&id, 1, 10, filters).unwrap();
  assert_eq!(filtered.total, 1);
  assert_eq!(filtered.records[0].index, 1);
}

#[test]
fn json_array_with_escaped_braces() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("recs.json");
  std::fs::write(&file, r#"[ {"s":"a}b","n":1}, {"s":"{","n":2} ]"#).unwrap();

  let id = index_sync(&eng, &file);
  let entry = eng.open_file_info(&file).unwrap().entry.unwrap();
  assert_eq!(entry.total_records, 2);

  let r1 = eng.get_record(&id, 1).unwrap();
  let s = r1.fields.iter().find(|(k, _)| k == "s").unwrap();
  assert_eq!(s.1, FieldValue::Str("{".into()));
  let n = r1.fields.iter().find(|(k, _)| k == "n").unwrap();
  assert_eq!(n.1, FieldValue::Int(2));
}

#[test]
fn vcard_with_continuation_and_multi_email() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("contact.vcf");
  std::fs::write(&file, "BEGIN:VCARD\nFN:Al\n Pha\nEMAIL:a@x\nEMAIL:b@y\nEND:VCARD\n").unwrap();

  let id = index_sync(&eng, &file);
  let entry = eng.open_file_info(&file).unwrap().entry.unwrap();
  assert_eq!(entry.total_records, 1);

  let r0 = eng.get_record(&id, 0).unwrap();
  let fn_field = r0.fields.iter().find(|(k, _)| k == "FN").unwrap();
  assert_eq!(fn_field.1, FieldValue::Str("Al Pha".into()));
  let email = r0.fields.iter().find(|(k, _)| k == "EMAIL").unwrap();
  assert_eq!(email.1, FieldValue::Str("a@x, b@y".into()));
}

#[test]
fn cancellation_leaves_no_artifacts_when_caught_mid_flight() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("big.csv");
  let mut contents = String::from("a,b\n");
  for i in 0..200_000 {
    contents.push_str(&format!("{i},val{i}\n"));
  }
  std::fs::write(&file, contents).unwrap();

  let file_id = eng.start_index(&file).unwrap();
  thread::sleep(Duration::from_millis(5));
  eng.cancel_index(&file_id).unwrap();

  for _ in 0..200 {
    let status = eng.index_status(&file_id).unwrap();
    if matches!(status.state, JobState::Cancelled | JobState::Complete) {
      break;
    }
    thread::sleep(Duration::from_millis(10));
  }
  let status = eng.index_status(&file_id).unwrap();
  if status.state == JobState::Cancelled {
    let info = eng.open_file_info(&file).unwrap();
    assert!(!info.indexed);
    let indexes_dir = dir.path().join("data").join("indexes");
    let leftover = std::fs::read_dir(&indexes_dir)
      .unwrap()
      .filter_map(|e| e.ok())
      .any(|e| e.file_name().to_string_lossy().starts_with(&file_id));
    assert!(!leftover, "cancelled job left artifacts behind");
  }
}

#[test]
fn search_operators_behave_per_spec() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("names.csv");
  std::fs::write(&file, "name\nalice\nalicia\nbob\n").unwrap();
  let id = index_sync(&eng, &file);

  let equals = eng.search(&id, search_field("name", "alice", SearchOperator::Equals)).unwrap();
  assert_eq!(equals.total, 1);

  let starts = eng.search(&id, search_field("name", "ali", SearchOperator::StartsWith)).unwrap();
  assert_eq!(starts.total, 2);

  let ends = eng.search(&id, search_field("name", "ce", SearchOperator::EndsWith)).unwrap();
  assert_eq!(ends.total, 1);

  let not = eng.search(&id, search_field("name", "ali", SearchOperator::Not)).unwrap();
  assert_eq!(not.total, 1);

  let regex = eng.search(&id, search_field("name", "^ali.*", SearchOperator::Regex)).unwrap();
  assert_eq!(regex.total, 2);
}

#[test]
fn empty_search_value_returns_empty_not_error() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("names.csv");
  std::fs::write(&file, "name\nalice\nbob\n").unwrap();
  let id = index_sync(&eng, &file);

  let res = eng.search(&id, search_field("name", "", SearchOperator::Contains)).unwrap();
  assert_eq!(res.total, 0);
  assert!(res.records.is_empty());
}

#[test]
fn forget_recent_removes_artifacts_and_resets_indexed_flag() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("a.csv");
  std::fs::write(&file, "a\n1\n2\n").unwrap();
  let id = index_sync(&eng, &file);

  eng.forget_recent(&id).unwrap();
  let info = eng.open_file_info(&file).unwrap();
  assert!(!info.indexed);

  let indexes_dir = dir.path().join("data").join("indexes");
  let leftover = std::fs::read_dir(&indexes_dir)
    .unwrap()
    .filter_map(|e| e.ok())
    .any(|e| e.file_name().to_string_lossy().starts_with(&id));
  assert!(!leftover);
}

#[test]
fn reindexing_unchanged_file_is_idempotent() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("a.csv");
  std::fs::write(&file, "a,b\n1,2\n3,4\n5,6\n").unwrap();

  let id1 = index_sync(&eng, &file);
  let entry1 = eng.open_file_info(&file).unwrap().entry.unwrap();
  let id2 = index_sync(&eng, &file);
  let entry2 = eng.open_file_info(&file).unwrap().entry.unwrap();

  assert_eq!(id1, id2);
  assert_eq!(entry1.total_records, entry2.total_records);
  assert_eq!(entry1.columns, entry2.columns);
  assert_eq!(entry1.searchable_columns, entry2.searchable_columns);
}

#[test]
fn stats_cover_top_values_and_distinct_counts() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("a.csv");
  std::fs::write(&file, "color\nred\nred\nblue\ngreen\nred\n").unwrap();
  let id = index_sync(&eng, &file);

  let stats = eng.stats(&id).unwrap();
  let color = stats.columns.iter().find(|c| c.name == "color").unwrap();
  assert_eq!(color.top_values[0], ("red".to_string(), 3));
  assert_eq!(color.distinct_approx, 3);
}

#[test]
fn no_trailing_newline_still_emits_final_record() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("a.csv");
  std::fs::write(&file, "a,b\n1,2\n3,4").unwrap();
  let id = index_sync(&eng, &file);

  let entry = eng.open_file_info(&file).unwrap().entry.unwrap();
  assert_eq!(entry.total_records, 2);
  let r1 = eng.get_record(&id, 1).unwrap();
  assert_eq!(r1.fields[0].1, FieldValue::Str("3".into()));
}

#[test]
fn crlf_line_endings_strip_carriage_return() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("a.csv");
  std::fs::write(&file, "a,b\r\n1,2\r\n").unwrap();
  let id = index_sync(&eng, &file);

  let r0 = eng.get_record(&id, 0).unwrap();
  assert_eq!(r0.fields[1].1, FieldValue::Str("2".into()));
}

#[test]
fn export_writes_csv_and_json() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("a.csv");
  std::fs::write(&file, "id,name\n1,Alice\n2,Bob\n").unwrap();
  let id = index_sync(&eng, &file);

  let out_csv = dir.path().join("out.csv");
  let result = eng
    .export(
      &id,
      ExportRequest { format: ExportFormat::Csv, filters: BTreeMap::new(), search: None, limit: None },
      &out_csv,
    )
    .unwrap();
  assert_eq!(result.records_written, 2);
  let contents = std::fs::read_to_string(&out_csv).unwrap();
  assert!(contents.contains("Alice"));

  let out_json = dir.path().join("out.json");
  let result = eng
    .export(
      &id,
      ExportRequest { format: ExportFormat::Json, filters: BTreeMap::new(), search: None, limit: Some(1) },
      &out_json,
    )
    .unwrap();
  assert_eq!(result.records_written, 1);
  let contents = std::fs::read_to_string(&out_json).unwrap();
  assert!(contents.trim_start().starts_with('['));
}

#[test]
fn validation_rejects_bad_inputs() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));

  let missing = dir.path().join("nope.csv");
  assert!(eng.open_file_info(&missing).is_err());

  let bad_ext = dir.path().join("a.txt");
  std::fs::write(&bad_ext, "x").unwrap();
  assert!(eng.open_file_info(&bad_ext).is_err());

  assert!(eng.get_record("not-a-valid-id", 0).is_err());
}

#[test]
fn empty_filter_set_is_full_scan_ordered_by_row_index() {
  let dir = tempfile::tempdir().unwrap();
  let eng = engine_with_data_dir(dir.path().join("data"));
  let file = dir.path().join("a.csv");
  std::fs::write(&file, "n\n3\n1\n2\n").unwrap();
  let id = index_sync(&eng, &file);

  let page = eng.page(&id, 1, 10, BTreeMap::new()).unwrap();
  assert_eq!(page.total, 3);
  let ids: Vec<u64> = page.records.iter().map(|r| r.index).collect();
  assert_eq!(ids, vec![0, 1, 2]);
}
