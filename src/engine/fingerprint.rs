// Stable check fingerprints.
//
// A check id must survive reordering of unrelated descriptor fields and
// must not change across runs, so it hashes exactly the identifying tuple
// and nothing else. Components are joined with an 0x1F unit separator so
// `("a", "bc")` and `("ab", "c")` cannot collide.

use sha2::{Digest, Sha256};

const UNIT_SEPARATOR: [u8; 1] = [0x1f];

/// Deterministic id for a declared check: lowercase hex SHA-256 over
/// `(datasource, check-name, dataset-identifier)`.
///
/// Dimension values and time buckets are deliberately excluded; they are
/// recorded as separate columns so one check id groups every partition of
/// a single declaration.
pub fn check_id(datasource: &str, check_name: &str, dataset_identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(datasource.as_bytes());
    hasher.update(UNIT_SEPARATOR);
    hasher.update(check_name.as_bytes());
    hasher.update(UNIT_SEPARATOR);
    hasher.update(dataset_identifier.as_bytes());
    format!("{:x}", hasher.finalize())
}
