//! The on-disk position table: a packed array of 48-bit little-endian byte
//! offsets, one per record, in source order. `entry[i]` is the start of the
//! *i*-th record.

use std::{
  fs::File,
  io::{BufWriter, Read, Write},
  path::Path,
};

use crate::engine::CoreError;

const ENTRY_BYTES: usize = 6;

pub struct PositionTableWriter {
  writer: BufWriter<File>,
  count: u64,
}

impl PositionTableWriter {
  pub fn create(path: &Path) -> Result<Self, CoreError> {
    let file = File::create(path)?;
    Ok(Self {
      writer: BufWriter::new(file),
      count: 0,
    })
  }

  pub fn push(&mut self, offset: u64) -> Result<(), CoreError> {
    debug_assert!(offset < (1u64 << 48), "offset does not fit in 48 bits");
    let bytes = offset.to_le_bytes();
    self.writer.write_all(&bytes[..ENTRY_BYTES])?;
    self.count += 1;
    Ok(())
  }

  pub fn finish(mut self) -> Result<u64, CoreError> {
    self.writer.flush()?;
    Ok(self.count)
  }
}

/// Load the full position table into memory. Position tables for the sizes
/// this engine supports fit comfortably in a bounded LRU buffer, so a single
/// read is sufficient (no mmap needed).
pub fn load(path: &Path) -> Result<Vec<u64>, CoreError> {
  let mut file = File::open(path)?;
  let mut buf = Vec::new();
  file.read_to_end(&mut buf)?;
  if buf.len() % ENTRY_BYTES != 0 {
    return Err(CoreError::Invariant(format!(
      "position table {} has size {} not a multiple of {ENTRY_BYTES}",
      path.display(),
      buf.len()
    )));
  }
  let mut out = Vec::with_capacity(buf.len() / ENTRY_BYTES);
  for chunk in buf.chunks_exact(ENTRY_BYTES) {
    let mut widened = [0u8; 8];
    widened[..ENTRY_BYTES].copy_from_slice(chunk);
    out.push(u64::from_le_bytes(widened));
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn round_trips_offsets() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("x.index.bin");
    let mut w = PositionTableWriter::create(&path).unwrap();
    let offsets = [0u64, 10, 29, 1_000_000_000_000];
    for o in offsets {
      w.push(o).unwrap();
    }
    let count = w.finish().unwrap();
    assert_eq!(count, offsets.len() as u64);

    let loaded = load(&path).unwrap();
    assert_eq!(loaded, offsets);
  }

  #[test]
  fn rejects_truncated_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.index.bin");
    std::fs::write(&path, [1u8, 2, 3, 4, 5]).unwrap();
    assert!(load(&path).is_err());
  }
}
