//! The relational secondary index (`search.db`): catalog, stats, search and
//! recent tables, plus the query operations C6 exposes to the record
//! reader. One `rusqlite` connection is opened per call, matching the
//! teacher's original `Storage` idiom — connections are cheap against a
//! local sqlite file and this engine has no pooled-connection requirement.

use std::{
  collections::BTreeMap,
  fs,
  path::{Path, PathBuf},
};

use rusqlite::{params, Connection, OptionalExtension};

use crate::{
  engine::CoreError,
  models::{CatalogEntry, FileFormat, SearchField, SearchOperator, SearchQuery, StatsResult},
};

#[derive(Debug, Clone)]
pub struct StorageOptions {
  /// Directory holding `search.db` and the `{id}.index.bin` position
  /// tables. Defaults to an app-specific dot-directory under the user's
  /// home, subdirectory `indexes/`, per spec.md §6.
  pub data_dir: Option<PathBuf>,
}

impl Default for StorageOptions {
  fn default() -> Self {
    Self { data_dir: None }
  }
}

#[derive(Clone)]
pub struct Storage {
  data_dir: PathBuf,
  db_path: PathBuf,
}

impl Storage {
  pub fn new(opts: StorageOptions) -> Result<Self, String> {
    let data_dir = opts.data_dir.unwrap_or_else(default_data_dir);
    let indexes_dir = data_dir.join("indexes");
    fs::create_dir_all(&indexes_dir).map_err(|e| e.to_string())?;
    let db_path = indexes_dir.join("search.db");

    let conn = Connection::open(&db_path).map_err(|e| e.to_string())?;
    migrate(&conn).map_err(|e| e.to_string())?;
    Ok(Self { data_dir, db_path })
  }

  pub(crate) fn open(&self) -> Result<Connection, CoreError> {
    let conn = Connection::open(&self.db_path).map_err(|e| CoreError::Storage(e.to_string()))?;
    conn
      .pragma_update(None, "foreign_keys", "off")
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    Ok(conn)
  }

  pub fn indexes_dir(&self) -> PathBuf {
    self.data_dir.join("indexes")
  }

  /// On startup, any legacy `{id}.meta.json` / `{id}.stats.json` without a
  /// corresponding `search.db` row is lazily migrated; any `search.db`
  /// catalog row without an accompanying `{id}.index.bin` is stale and
  /// purged (spec.md §6).
  pub fn migrate_legacy_artifacts(&self) -> Result<(), CoreError> {
    let dir = self.indexes_dir();
    let Ok(entries) = fs::read_dir(&dir) else {
      return Ok(());
    };

    let conn = self.open()?;
    let known_ids = self.list_all_ids_with(&conn)?;

    for entry in entries.flatten() {
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };
      let Some(id) = name.strip_suffix(".meta.json") else { continue };
      if known_ids.iter().any(|k| k == id) {
        continue;
      }
      if let Ok(text) = fs::read_to_string(entry.path()) {
        if let Ok(entry) = serde_json::from_str::<CatalogEntry>(&text) {
          let stats_path = dir.join(format!("{id}.stats.json"));
          let stats = fs::read_to_string(&stats_path)
            .ok()
            .and_then(|s| serde_json::from_str::<StatsResult>(&s).ok());
          self.put_catalog_legacy(&conn, &entry, stats)?;
        }
      }
    }

    for id in self.list_all_ids_with(&conn)? {
      if !dir.join(format!("{id}.index.bin")).exists() {
        self.forget_with(&conn, &id)?;
      }
    }
    Ok(())
  }

  fn put_catalog_legacy(&self, conn: &Connection, entry: &CatalogEntry, stats: Option<StatsResult>) -> Result<(), CoreError> {
    insert_catalog_row(conn, entry).map_err(|e| CoreError::Storage(e.to_string()))?;
    if let Some(stats) = stats {
      insert_stats_row(conn, &entry.file_id, &stats).map_err(|e| CoreError::Storage(e.to_string()))?;
    }
    Ok(())
  }

  pub(crate) fn get_catalog(&self, file_id: &str) -> Result<Option<CatalogEntry>, CoreError> {
    let conn = self.open()?;
    get_catalog_with(&conn, file_id)
  }

  pub(crate) fn list_all_ids(&self) -> Result<Vec<String>, CoreError> {
    let conn = self.open()?;
    self.list_all_ids_with(&conn)
  }

  fn list_all_ids_with(&self, conn: &Connection) -> Result<Vec<String>, CoreError> {
    let mut stmt = conn
      .prepare("SELECT file_id FROM catalog")
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    let rows = stmt
      .query_map([], |r| r.get::<_, String>(0))
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    let mut out = Vec::new();
    for r in rows {
      out.push(r.map_err(|e| CoreError::Storage(e.to_string()))?);
    }
    Ok(out)
  }

  pub(crate) fn touch_recent(&self, file_id: &str, at_ms: i64) -> Result<(), CoreError> {
    let conn = self.open()?;
    conn
      .execute(
        "INSERT INTO recent(file_id, last_opened_at_ms) VALUES(?1, ?2)
         ON CONFLICT(file_id) DO UPDATE SET last_opened_at_ms = excluded.last_opened_at_ms",
        params![file_id, at_ms],
      )
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    Ok(())
  }

  pub(crate) fn list_recent(&self, limit: usize) -> Result<Vec<CatalogEntry>, CoreError> {
    let conn = self.open()?;
    let mut stmt = conn
      .prepare(
        "SELECT c.file_id, c.path, c.name, c.size, c.format, c.delimiter, c.indexed_at_ms,
                c.total_records, c.columns_json, c.searchable_columns_json
         FROM recent r JOIN catalog c ON c.file_id = r.file_id
         ORDER BY r.last_opened_at_ms DESC
         LIMIT ?1",
      )
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    let rows = stmt
      .query_map(params![limit as i64], row_to_catalog_entry)
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    let mut out = Vec::new();
    for r in rows {
      out.push(r.map_err(|e| CoreError::Storage(e.to_string()))?);
    }
    Ok(out)
  }

  pub(crate) fn forget(&self, file_id: &str) -> Result<(), CoreError> {
    let conn = self.open()?;
    self.forget_with(&conn, file_id)
  }

  fn forget_with(&self, conn: &Connection, file_id: &str) -> Result<(), CoreError> {
    delete_file_rows(conn, file_id).map_err(|e| CoreError::Storage(e.to_string()))?;
    conn
      .execute("DELETE FROM recent WHERE file_id = ?1", params![file_id])
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    Ok(())
  }

  pub(crate) fn load_stats(&self, file_id: &str) -> Result<StatsResult, CoreError> {
    let conn = self.open()?;
    let json: Option<String> = conn
      .query_row("SELECT stats_json FROM stats WHERE file_id = ?1", params![file_id], |r| r.get(0))
      .optional()
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    match json {
      Some(json) => serde_json::from_str(&json).map_err(|e| CoreError::Storage(e.to_string())),
      None => Ok(StatsResult { file_id: file_id.to_string(), columns: Vec::new() }),
    }
  }

  pub(crate) fn count(
    &self,
    file_id: &str,
    entry: &CatalogEntry,
    filters: &BTreeMap<String, String>,
  ) -> Result<u64, CoreError> {
    let conn = self.open()?;
    let (clause, values) = filter_clause(entry, filters);
    let sql = format!("SELECT COUNT(*) FROM search WHERE file_id = ?1{clause}");
    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&file_id];
    for v in &values {
      params.push(v);
    }
    conn
      .query_row(&sql, params.as_slice(), |r| r.get::<_, i64>(0))
      .map(|n| n.max(0) as u64)
      .map_err(|e| CoreError::Storage(e.to_string()))
  }

  pub(crate) fn page(
    &self,
    file_id: &str,
    entry: &CatalogEntry,
    page: u64,
    limit: u64,
    filters: &BTreeMap<String, String>,
  ) -> Result<Vec<(u64, u64)>, CoreError> {
    let conn = self.open()?;
    let (clause, values) = filter_clause(entry, filters);
    let offset = (page - 1) * limit;
    let sql = format!(
      "SELECT row_index, position FROM search WHERE file_id = ?1{clause} ORDER BY row_index LIMIT ?{n1} OFFSET ?{n2}",
      n1 = values.len() + 2,
      n2 = values.len() + 3,
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| CoreError::Storage(e.to_string()))?;
    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&file_id];
    for v in &values {
      params.push(v);
    }
    params.push(&limit);
    params.push(&offset);
    let rows = stmt
      .query_map(params.as_slice(), |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, i64>(1)? as u64)))
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    let mut out = Vec::new();
    for r in rows {
      out.push(r.map_err(|e| CoreError::Storage(e.to_string()))?);
    }
    Ok(out)
  }

  pub(crate) fn search(
    &self,
    file_id: &str,
    entry: &CatalogEntry,
    query: &SearchQuery,
    page: u64,
    limit: u64,
  ) -> Result<(Vec<(u64, u64)>, u64), CoreError> {
    // "every field value shorter than 1 character" short-circuits to empty,
    // not an error (spec.md §8 boundary behavior).
    if query.fields.values().any(|f| f.value.is_empty()) {
      return Ok((Vec::new(), 0));
    }

    let conn = self.open()?;
    let (clause, values) = search_clause(entry, &query.fields);
    let offset = (page - 1) * limit;

    let count_sql = format!("SELECT COUNT(*) FROM search WHERE file_id = ?1{clause}");
    let mut count_params: Vec<&dyn rusqlite::ToSql> = vec![&file_id];
    for v in &values {
      count_params.push(v);
    }
    let total: i64 = conn
      .query_row(&count_sql, count_params.as_slice(), |r| r.get(0))
      .map_err(|e| CoreError::Storage(e.to_string()))?;

    let sql = format!(
      "SELECT row_index, position FROM search WHERE file_id = ?1{clause} ORDER BY row_index LIMIT ?{n1} OFFSET ?{n2}",
      n1 = values.len() + 2,
      n2 = values.len() + 3,
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| CoreError::Storage(e.to_string()))?;
    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&file_id];
    for v in &values {
      params.push(v);
    }
    params.push(&limit);
    params.push(&offset);
    let rows = stmt
      .query_map(params.as_slice(), |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, i64>(1)? as u64)))
      .map_err(|e| CoreError::Storage(e.to_string()))?;
    let mut out = Vec::new();
    for r in rows {
      out.push(r.map_err(|e| CoreError::Storage(e.to_string()))?);
    }
    Ok((out, total.max(0) as u64))
  }
}

fn get_catalog_with(conn: &Connection, file_id: &str) -> Result<Option<CatalogEntry>, CoreError> {
  conn
    .query_row(
      "SELECT file_id, path, name, size, format, delimiter, indexed_at_ms,
              total_records, columns_json, searchable_columns_json
       FROM catalog WHERE file_id = ?1",
      params![file_id],
      row_to_catalog_entry,
    )
    .optional()
    .map_err(|e| CoreError::Storage(e.to_string()))
}

fn row_to_catalog_entry(row: &rusqlite::Row) -> rusqlite::Result<CatalogEntry> {
  let format_str: String = row.get(4)?;
  let format = parse_format(&format_str);
  let delimiter: Option<String> = row.get(5)?;
  let columns_json: String = row.get(8)?;
  let searchable_json: String = row.get(9)?;
  Ok(CatalogEntry {
    file_id: row.get(0)?,
    path: row.get(1)?,
    name: row.get(2)?,
    size: row.get::<_, i64>(3)? as u64,
    format,
    delimiter: delimiter.and_then(|s| s.chars().next()),
    indexed_at_ms: row.get(6)?,
    total_records: row.get::<_, i64>(7)? as u64,
    columns: serde_json::from_str(&columns_json).unwrap_or_default(),
    searchable_columns: serde_json::from_str(&searchable_json).unwrap_or_default(),
  })
}

fn parse_format(s: &str) -> FileFormat {
  match s {
    "csv" => FileFormat::Csv,
    "ndjson" => FileFormat::Ndjson,
    "json-array" => FileFormat::JsonArray,
    _ => FileFormat::Vcard,
  }
}

pub(crate) fn insert_catalog_row(conn: &Connection, entry: &CatalogEntry) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO catalog(file_id, path, name, size, format, delimiter, indexed_at_ms,
                          total_records, columns_json, searchable_columns_json)
     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
     ON CONFLICT(file_id) DO UPDATE SET
       path=excluded.path, name=excluded.name, size=excluded.size, format=excluded.format,
       delimiter=excluded.delimiter, indexed_at_ms=excluded.indexed_at_ms,
       total_records=excluded.total_records, columns_json=excluded.columns_json,
       searchable_columns_json=excluded.searchable_columns_json",
    params![
      entry.file_id,
      entry.path,
      entry.name,
      entry.size as i64,
      entry.format.as_str(),
      entry.delimiter.map(|c| c.to_string()),
      entry.indexed_at_ms,
      entry.total_records as i64,
      serde_json::to_string(&entry.columns).unwrap_or_default(),
      serde_json::to_string(&entry.searchable_columns).unwrap_or_default(),
    ],
  )?;
  Ok(())
}

pub(crate) fn insert_stats_row(conn: &Connection, file_id: &str, stats: &StatsResult) -> rusqlite::Result<()> {
  let json = serde_json::to_string(stats).unwrap_or_default();
  conn.execute(
    "INSERT INTO stats(file_id, stats_json) VALUES(?1, ?2)
     ON CONFLICT(file_id) DO UPDATE SET stats_json=excluded.stats_json",
    params![file_id, json],
  )?;
  Ok(())
}

pub(crate) fn insert_search_row(
  conn: &Connection,
  file_id: &str,
  row_index: u64,
  position: u64,
  projections: &[Option<String>; 6],
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO search(file_id, row_index, position, col0, col1, col2, col3, col4, col5)
     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    params![
      file_id,
      row_index as i64,
      position as i64,
      projections[0],
      projections[1],
      projections[2],
      projections[3],
      projections[4],
      projections[5],
    ],
  )?;
  Ok(())
}

pub(crate) fn delete_file_rows(conn: &Connection, file_id: &str) -> rusqlite::Result<()> {
  conn.execute("DELETE FROM search WHERE file_id = ?1", params![file_id])?;
  conn.execute("DELETE FROM stats WHERE file_id = ?1", params![file_id])?;
  conn.execute("DELETE FROM catalog WHERE file_id = ?1", params![file_id])?;
  Ok(())
}

/// `col_k LIKE %v%` for each filter, `k` = index of that column in
/// searchable columns. Columns absent from searchable columns or beyond
/// index 5 are ignored, as `page`'s filters share the same substring
/// semantics as `count`.
fn filter_clause(entry: &CatalogEntry, filters: &BTreeMap<String, String>) -> (String, Vec<String>) {
  let mut clause = String::new();
  let mut values = Vec::new();
  for (col, value) in filters {
    let Some(idx) = entry.searchable_columns.iter().position(|c| c == col) else {
      continue;
    };
    if idx > 5 {
      continue;
    }
    clause.push_str(&format!(" AND col{idx} LIKE ?{}", values.len() + 2));
    values.push(format!("%{}%", value.to_lowercase()));
  }
  (clause, values)
}

/// Operator-based WHERE clause for `search`. All conditions are ANDed.
fn search_clause(entry: &CatalogEntry, fields: &BTreeMap<String, SearchField>) -> (String, Vec<String>) {
  let mut clause = String::new();
  let mut values = Vec::new();
  for (col, field) in fields {
    let Some(idx) = entry.searchable_columns.iter().position(|c| c == col) else {
      continue;
    };
    if idx > 5 {
      continue;
    }
    let value = field.value.to_lowercase();
    let n = values.len() + 2;
    match field.operator {
      SearchOperator::Contains => {
        clause.push_str(&format!(" AND col{idx} LIKE ?{n}"));
        values.push(format!("%{value}%"));
      }
      SearchOperator::Equals => {
        clause.push_str(&format!(" AND col{idx} = ?{n}"));
        values.push(value);
      }
      SearchOperator::StartsWith => {
        clause.push_str(&format!(" AND col{idx} LIKE ?{n}"));
        values.push(format!("{value}%"));
      }
      SearchOperator::EndsWith => {
        clause.push_str(&format!(" AND col{idx} LIKE ?{n}"));
        values.push(format!("%{value}"));
      }
      SearchOperator::Not => {
        clause.push_str(&format!(" AND (col{idx} IS NULL OR col{idx} NOT LIKE ?{n})"));
        values.push(format!("%{value}%"));
      }
      SearchOperator::Regex => {
        let mut pattern = value.replace(".*", "%").replace('.', "_");
        pattern = pattern
          .strip_prefix('^')
          .map(|s| s.to_string())
          .unwrap_or(pattern);
        pattern = pattern
          .strip_suffix('$')
          .map(|s| s.to_string())
          .unwrap_or(pattern);
        if !pattern.contains('%') && !pattern.contains('_') {
          pattern = format!("%{pattern}%");
        }
        clause.push_str(&format!(" AND col{idx} LIKE ?{n}"));
        values.push(pattern);
      }
    }
  }
  (clause, values)
}

fn sanitize_id(id: &str) -> String {
  id.chars().filter(|c| c.is_ascii_hexdigit()).collect()
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
  conn.execute_batch(
    r#"
CREATE TABLE IF NOT EXISTS catalog(
  file_id TEXT PRIMARY KEY,
  path TEXT NOT NULL,
  name TEXT NOT NULL,
  size INTEGER NOT NULL,
  format TEXT NOT NULL,
  delimiter TEXT,
  indexed_at_ms INTEGER NOT NULL,
  total_records INTEGER NOT NULL,
  columns_json TEXT NOT NULL,
  searchable_columns_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stats(
  file_id TEXT PRIMARY KEY,
  stats_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS search(
  auto_id INTEGER PRIMARY KEY AUTOINCREMENT,
  file_id TEXT NOT NULL,
  row_index INTEGER NOT NULL,
  position INTEGER NOT NULL,
  col0 TEXT,
  col1 TEXT,
  col2 TEXT,
  col3 TEXT,
  col4 TEXT,
  col5 TEXT
);
CREATE INDEX IF NOT EXISTS idx_search_file ON search(file_id, row_index);
CREATE INDEX IF NOT EXISTS idx_search_col0 ON search(file_id, col0);
CREATE INDEX IF NOT EXISTS idx_search_col1 ON search(file_id, col1);
CREATE INDEX IF NOT EXISTS idx_search_col2 ON search(file_id, col2);

CREATE TABLE IF NOT EXISTS recent(
  file_id TEXT PRIMARY KEY,
  last_opened_at_ms INTEGER NOT NULL
);
    "#,
  )?;
  Ok(())
}

pub(crate) fn delete_artifacts(indexes_dir: &Path, file_id: &str) -> Result<(), CoreError> {
  let id = sanitize_id(file_id);
  for suffix in [".index.bin", ".index.bin.tmp", ".meta.json", ".stats.json"] {
    let path = indexes_dir.join(format!("{id}{suffix}"));
    if path.exists() {
      fs::remove_file(&path)?;
    }
  }
  Ok(())
}

fn default_data_dir() -> PathBuf {
  let base = std::env::var_os("HOME")
    .or_else(|| std::env::var_os("USERPROFILE"))
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));
  base.join(".datalens")
}
