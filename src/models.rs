use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
  Csv,
  Ndjson,
  JsonArray,
  Vcard,
}

impl FileFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      FileFormat::Csv => "csv",
      FileFormat::Ndjson => "ndjson",
      FileFormat::JsonArray => "json-array",
      FileFormat::Vcard => "vcf",
    }
  }
}

/// A single decoded column value. `Json` carries a pre-serialized JSON string
/// for array/object-shaped values so the type set never has to widen further.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
  Json(String),
}

impl FieldValue {
  /// Lowercased, `|`-stripped projection used for the six searchable columns.
  /// The `|` stripping is a vestige of a legacy text projection; kept for
  /// byte-for-byte continuity even though the relational index no longer
  /// relies on `|` as a separator (see DESIGN.md open questions).
  pub fn projection(&self) -> Option<String> {
    let s = match self {
      FieldValue::Null => return None,
      FieldValue::Bool(b) => b.to_string(),
      FieldValue::Int(n) => n.to_string(),
      FieldValue::Float(f) => f.to_string(),
      FieldValue::Str(s) => s.clone(),
      FieldValue::Json(s) => s.clone(),
    };
    Some(s.to_lowercase().replace('|', ""))
  }

  /// String form used for stats distribution keys: original case, no `|`
  /// stripping. Distinct from `projection()`, which is search-oriented.
  pub(crate) fn display_string(&self) -> Option<String> {
    match self {
      FieldValue::Null => None,
      FieldValue::Bool(b) => Some(b.to_string()),
      FieldValue::Int(n) => Some(n.to_string()),
      FieldValue::Float(f) => Some(f.to_string()),
      FieldValue::Str(s) => Some(s.clone()),
      FieldValue::Json(s) => Some(s.clone()),
    }
  }
}

/// One decoded record: declared-column key/value pairs in declaration order,
/// plus the row index and (for search results) an exactness tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  pub fields: Vec<(String, FieldValue)>,
  pub index: u64,
  pub exact: Option<bool>,
}

impl Serialize for Record {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
    for (k, v) in &self.fields {
      map.serialize_entry(k, v)?;
    }
    map.serialize_entry("_index", &self.index)?;
    if let Some(exact) = self.exact {
      map.serialize_entry("_exact", &exact)?;
    }
    map.end()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
  pub file_id: String,
  pub path: String,
  pub name: String,
  pub size: u64,
  pub format: FileFormat,
  pub delimiter: Option<char>,
  pub indexed_at_ms: i64,
  pub total_records: u64,
  pub columns: Vec<String>,
  pub searchable_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFileInfo {
  pub entry: Option<CatalogEntry>,
  pub path: String,
  pub indexed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Idle,
  Indexing,
  Complete,
  Cancelled,
  Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
  pub file_id: String,
  pub state: JobState,
  pub percent: u8,
  pub records_so_far: u64,
  pub eta_secs: u64,
  pub warnings: u64,
  pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
  pub records: Vec<Record>,
  pub page: u64,
  pub limit: u64,
  pub total: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SearchOperator {
  Contains,
  Equals,
  StartsWith,
  EndsWith,
  Not,
  Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchField {
  pub value: String,
  pub operator: SearchOperator,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchQuery {
  pub fields: BTreeMap<String, SearchField>,
  pub exact: bool,
  pub page: u64,
  pub limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
  pub records: Vec<Record>,
  pub total: u64,
  pub page: u64,
  pub limit: u64,
  pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
  pub name: String,
  pub declared_type: String,
  pub distinct_approx: u64,
  pub top_values: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResult {
  pub file_id: String,
  pub columns: Vec<ColumnStats>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
  Csv,
  Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
  pub format: ExportFormat,
  pub filters: BTreeMap<String, String>,
  pub search: Option<SearchQuery>,
  pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
  pub output_path: String,
  pub records_written: u64,
}
