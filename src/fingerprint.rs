/// Derive a stable 16-hex file identifier from path + size + mtime.
///
/// Treating path+size+mtime as identity is intentional: moving or truncating
/// the file produces a new id; two distinct paths never collide unless both
/// size and mtime also match.
pub fn fingerprint(path: &str, size: u64, mtime_ms: i64) -> String {
  let input = format!("{path}:{size}:{mtime_ms}");
  let digest = md5::compute(input.as_bytes());
  let hex = format!("{digest:x}");
  hex[..16].to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stable_for_same_inputs() {
    let a = fingerprint("/tmp/a.csv", 1024, 1_700_000_000_000);
    let b = fingerprint("/tmp/a.csv", 1024, 1_700_000_000_000);
    assert_eq!(a, b);
    assert_eq!(a.len(), 16);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
  }

  #[test]
  fn changes_with_size_or_mtime() {
    let base = fingerprint("/tmp/a.csv", 1024, 1_700_000_000_000);
    let resized = fingerprint("/tmp/a.csv", 2048, 1_700_000_000_000);
    let retouched = fingerprint("/tmp/a.csv", 1024, 1_700_000_000_001);
    assert_ne!(base, resized);
    assert_ne!(base, retouched);
  }

  #[test]
  fn distinct_paths_do_not_collide_without_matching_size_and_mtime() {
    let a = fingerprint("/tmp/a.csv", 1024, 1_700_000_000_000);
    let b = fingerprint("/tmp/b.csv", 1024, 1_700_000_000_000);
    assert_ne!(a, b);
  }
}
