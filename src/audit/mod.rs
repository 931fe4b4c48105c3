//! Audit fingerprints
//!
//! Ties a report to the exact baseline it was computed from. Nothing is
//! stored; the fingerprint travels inside the report itself.

use crate::models::BaselineSnapshot;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;

/// SHA-256 of the serialized snapshot, hex encoded
pub fn compute_snapshot_hash(snapshot: &BaselineSnapshot) -> String {
    compute_hash(snapshot)
}

/// Uses streaming serialization into the hasher
fn compute_hash<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SnapshotSource;
    use uuid::Uuid;

    #[test]
    fn test_snapshot_hash_is_stable_and_sensitive() {
        let org_id = Uuid::new_v4();
        let a = BaselineSnapshot {
            cash_balance: 500_000.0,
            ..BaselineSnapshot::empty(org_id, SnapshotSource::ModelRun)
        };
        let b = a.clone();
        let c = BaselineSnapshot {
            cash_balance: 500_001.0,
            ..a.clone()
        };

        let hash = compute_snapshot_hash(&a);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_snapshot_hash(&b));
        assert_ne!(hash, compute_snapshot_hash(&c));
    }
}
