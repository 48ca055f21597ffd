//! Byte-string row key arithmetic.
//!
//! Row keys are ordered lexicographically by byte. A prefix `P` covers the
//! half-open interval `[P, increment(P))`, which is what prefix permissions
//! and prefix scans are built on.

/// Row key: an arbitrary byte string, unique per table.
pub type RowKey = Vec<u8>;

/// Smallest key strictly greater than every key that starts with `prefix`,
/// obtained by bumping the last byte.
///
/// Returns `None` for the empty prefix (it covers the whole keyspace) and for
/// prefixes whose last byte is `0xff` (the bump would roll over).
pub fn increment_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let (&last, head) = prefix.split_last()?;
    if last == u8::MAX {
        return None;
    }
    let mut out = Vec::with_capacity(prefix.len());
    out.extend_from_slice(head);
    out.push(last + 1);
    Some(out)
}

/// Longest byte prefix shared by `a` and `b`.
pub fn common_prefix<'a>(a: &'a [u8], b: &[u8]) -> &'a [u8] {
    let len = a
        .iter()
        .zip(b.iter())
        .take_while(|(x, y)| x == y)
        .count();
    &a[..len]
}

/// `true` iff `key` starts with `prefix`.
pub fn has_prefix(key: &[u8], prefix: &[u8]) -> bool {
    key.starts_with(prefix)
}
