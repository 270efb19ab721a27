//! Statistics accumulator (C9). One `StatsAccumulator` per indexing job,
//! fed one record at a time; `finish()` produces the `StatsResult` written
//! to the `stats` table alongside the catalog row.
//!
//! Each tracked column keeps an insertion-order vector of (value, count)
//! pairs plus a `HashMap<value, index>` for O(1) lookup — a plain `HashMap`
//! alone would lose the first-seen order needed to break ties among values
//! with equal counts once the working set is capped.

use std::collections::HashMap;

use crate::models::{ColumnStats, FieldValue, StatsResult};

struct ColumnAccumulator {
  name: String,
  index: HashMap<String, usize>,
  values: Vec<(String, u64)>,
  distinct_seen: u64,
  capped: bool,
}

impl ColumnAccumulator {
  fn new(name: String) -> Self {
    Self { name, index: HashMap::new(), values: Vec::new(), distinct_seen: 0, capped: false }
  }

  fn observe(&mut self, value: &str, cap: usize) {
    if let Some(&i) = self.index.get(value) {
      self.values[i].1 += 1;
      return;
    }
    if self.values.len() >= cap {
      // Working set is full; a never-before-seen value is dropped rather
      // than evicting an existing one, and the approximate distinct count
      // is held flat at the cap (documented skew, spec.md §3).
      self.capped = true;
      return;
    }
    self.distinct_seen += 1;
    self.index.insert(value.to_string(), self.values.len());
    self.values.push((value.to_string(), 1));
  }

  fn finish(mut self, top_n: usize) -> ColumnStats {
    self.values.sort_by(|a, b| b.1.cmp(&a.1));
    self.values.truncate(top_n);
    ColumnStats {
      name: self.name,
      declared_type: "string".to_string(),
      distinct_approx: self.distinct_seen,
      top_values: self.values,
    }
  }
}

pub(crate) struct StatsAccumulator {
  columns: Vec<ColumnAccumulator>,
  distinct_cap: usize,
  top_n: usize,
}

impl StatsAccumulator {
  /// Tracks the first `max_columns` declared columns only, per spec.md §3.
  pub(crate) fn new(declared_columns: &[String], max_columns: usize, distinct_cap: usize, top_n: usize) -> Self {
    let columns = declared_columns
      .iter()
      .take(max_columns)
      .map(|c| ColumnAccumulator::new(c.clone()))
      .collect();
    Self { columns, distinct_cap, top_n }
  }

  /// `values` is aligned to the full declared-column list; only the first
  /// `self.columns.len()` entries are consulted. Nulls are excluded from the
  /// distribution — a missing/null field contributes no value to count.
  pub(crate) fn observe(&mut self, values: &[Option<FieldValue>]) {
    for (col, value) in self.columns.iter_mut().zip(values.iter()) {
      let Some(value) = value else { continue };
      let Some(text) = value.display_string() else { continue };
      col.observe(&text, self.distinct_cap);
    }
  }

  /// Re-titles tracked columns in place, preserving accumulated counts.
  /// Used when the accumulator had to start before the parser's declared
  /// column names stabilized (NDJSON/JSON-array only know them once the
  /// first record decodes, which is already mid-stream).
  pub(crate) fn set_names(&mut self, names: &[String]) {
    for (col, name) in self.columns.iter_mut().zip(names.iter()) {
      col.name = name.clone();
    }
  }

  pub(crate) fn finish(self, file_id: &str) -> StatsResult {
    let top_n = self.top_n;
    StatsResult {
      file_id: file_id.to_string(),
      columns: self.columns.into_iter().map(|c| c.finish(top_n)).collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn counts_and_orders_by_frequency() {
    let declared = cols(&["a", "b"]);
    let mut acc = StatsAccumulator::new(&declared, 10, 100, 30);
    let rows = [
      vec![Some(FieldValue::Str("x".into())), Some(FieldValue::Int(1))],
      vec![Some(FieldValue::Str("y".into())), Some(FieldValue::Int(1))],
      vec![Some(FieldValue::Str("x".into())), Some(FieldValue::Int(2))],
    ];
    for row in &rows {
      acc.observe(row);
    }
    let result = acc.finish("abc");
    let a = result.columns.iter().find(|c| c.name == "a").unwrap();
    assert_eq!(a.top_values[0], ("x".to_string(), 2));
    assert_eq!(a.distinct_approx, 2);
  }

  #[test]
  fn nulls_excluded_from_distribution() {
    let declared = cols(&["a"]);
    let mut acc = StatsAccumulator::new(&declared, 10, 100, 30);
    acc.observe(&[Some(FieldValue::Null)]);
    acc.observe(&[None]);
    acc.observe(&[Some(FieldValue::Str("x".into()))]);
    let result = acc.finish("id");
    assert_eq!(result.columns[0].distinct_approx, 1);
    assert_eq!(result.columns[0].top_values, vec![("x".to_string(), 1)]);
  }

  #[test]
  fn only_first_max_columns_tracked() {
    let declared = cols(&["a", "b", "c"]);
    let acc = StatsAccumulator::new(&declared, 2, 100, 30);
    assert_eq!(acc.columns.len(), 2);
  }

  #[test]
  fn working_set_cap_drops_new_values_once_full() {
    let declared = cols(&["a"]);
    let mut acc = StatsAccumulator::new(&declared, 10, 2, 30);
    acc.observe(&[Some(FieldValue::Str("x".into()))]);
    acc.observe(&[Some(FieldValue::Str("y".into()))]);
    acc.observe(&[Some(FieldValue::Str("z".into()))]);
    acc.observe(&[Some(FieldValue::Str("x".into()))]);
    let result = acc.finish("id");
    assert_eq!(result.columns[0].top_values.len(), 2);
    let total: u64 = result.columns[0].top_values.iter().map(|(_, n)| *n).sum();
    assert_eq!(total, 3);
  }
}
