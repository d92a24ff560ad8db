//! Integrity Verifier
//!
//! Asks the store for the aggregate hash of a freshly written chunk set.
//! In safe mode that hash must equal the one computed locally while the
//! bytes streamed in; on mismatch the chunk set is purged before the error
//! is returned, so no file record can ever point at it.

use super::removal::RemovalCoordinator;
use crate::error::{GridError, Result};
use crate::hash::ContentHash;
use crate::storage::{DocumentStore, Value};

pub struct IntegrityVerifier<'a> {
    store: &'a dyn DocumentStore,
    root: &'a str,
}

impl<'a> IntegrityVerifier<'a> {
    pub fn new(store: &'a dyn DocumentStore, root: &'a str) -> Self {
        Self { store, root }
    }

    /// `local` is `Some` in safe mode. Without it the store's hash is trusted.
    pub fn verify(
        &self,
        target_id: &Value,
        local: Option<ContentHash>,
        removal: &RemovalCoordinator<'_>,
    ) -> Result<ContentHash> {
        let reported = self.store.aggregate_hash(self.root, target_id)?;

        let Some(computed) = local else {
            return Ok(reported);
        };
        if computed == reported {
            tracing::debug!("[IntegrityVerifier] File {} verified: {}", target_id, reported);
            return Ok(reported);
        }

        tracing::warn!(
            "[IntegrityVerifier] Hash mismatch for file {}: store {} vs local {}; purging chunks",
            target_id,
            reported,
            computed
        );
        if let Err(e) = removal.purge_chunks(target_id, true) {
            tracing::warn!("[IntegrityVerifier] Purge after mismatch failed for {}: {}", target_id, e);
        }

        Err(GridError::Integrity {
            id: target_id.to_string(),
            reported: reported.to_hex(),
            computed: computed.to_hex(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::testing::FaultyStore;
    use crate::storage::Document;

    fn seed_chunks(store: &FaultyStore) {
        for (n, data) in [b"ABCD".to_vec(), b"EF".to_vec()].into_iter().enumerate() {
            store
                .insert(
                    "fs.chunks",
                    Document::new().with("files_id", "f").with("n", n as i64).with("data", data),
                )
                .unwrap();
        }
    }

    #[test]
    fn test_safe_mode_accepts_matching_hash() {
        let store = FaultyStore::new();
        seed_chunks(&store);
        let removal = RemovalCoordinator::new(&store, "fs.files", "fs.chunks");

        let hash = IntegrityVerifier::new(&store, "fs")
            .verify(&Value::from("f"), Some(ContentHash::compute(b"ABCDEF")), &removal)
            .unwrap();
        assert_eq!(hash, ContentHash::compute(b"ABCDEF"));
        assert_eq!(store.inner.len("fs.chunks").unwrap(), 2);
    }

    #[test]
    fn test_safe_mode_mismatch_purges_chunks() {
        let store = FaultyStore::new();
        seed_chunks(&store);
        store.forge_hash(ContentHash::compute(b"forged"));
        let removal = RemovalCoordinator::new(&store, "fs.files", "fs.chunks");

        let err = IntegrityVerifier::new(&store, "fs")
            .verify(&Value::from("f"), Some(ContentHash::compute(b"ABCDEF")), &removal)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(store.inner.len("fs.chunks").unwrap(), 0);
    }

    #[test]
    fn test_trusting_mode_accepts_store_hash() {
        let store = FaultyStore::new();
        seed_chunks(&store);
        let forged = ContentHash::compute(b"forged");
        store.forge_hash(forged);
        let removal = RemovalCoordinator::new(&store, "fs.files", "fs.chunks");

        let hash = IntegrityVerifier::new(&store, "fs")
            .verify(&Value::from("f"), None, &removal)
            .unwrap();
        assert_eq!(hash, forged);
        assert_eq!(store.inner.len("fs.chunks").unwrap(), 2);
    }
}
