//! Content-addressed identity for uploads.
//!
//! Two uploads with identical bytes always land on the same record, whatever
//! their filename or uploader.

use std::sync::Arc;

use crate::fingerprint::Fingerprint;
use crate::record::ImageRecord;
use crate::store::{RecordStore, StoreError};

/// Outcome of [`ContentStore::identify_or_create`].
#[derive(Debug, Clone)]
pub struct Identified {
    pub fingerprint: Fingerprint,
    pub record: ImageRecord,
    /// True if this upload was the first observation of the content.
    pub created: bool,
}

pub struct ContentStore {
    store: Arc<dyn RecordStore>,
}

impl ContentStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Create the record for a fingerprinted upload or associate the upload
    /// with the existing one.
    ///
    /// Both branches end with the same idempotent set insertions, so two
    /// concurrent first uploads of the same content converge on one record
    /// carrying both filenames and both users.
    pub async fn identify_or_create(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
        uploader: &str,
    ) -> Result<Identified, StoreError> {
        let fingerprint = fingerprint.clone();

        let created = match self.store.get_record(&fingerprint).await? {
            Some(_) => false,
            None => {
                self.store
                    .put_record(ImageRecord::seeded(fingerprint.clone(), filename, uploader))
                    .await?
            }
        };

        self.store.add_user(&fingerprint, uploader).await?;
        self.store.add_filename(&fingerprint, filename).await?;

        let record = self.store.get_record(&fingerprint).await?.ok_or_else(|| {
            StoreError::Unavailable(format!("record {fingerprint} vanished after write"))
        })?;

        tracing::debug!(fingerprint = %fingerprint, created, filename, "Identified upload");

        Ok(Identified {
            fingerprint,
            record,
            created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use std::collections::BTreeSet;

    fn adapter() -> (Arc<MemoryRecordStore>, ContentStore) {
        let store = Arc::new(MemoryRecordStore::new());
        (Arc::clone(&store), ContentStore::new(store))
    }

    #[tokio::test]
    async fn first_upload_creates_record() {
        let (store, content) = adapter();
        let identified = content
            .identify_or_create(&Fingerprint::of_bytes(b"pixels"), "a.png", "alice")
            .await
            .unwrap();

        assert!(identified.created);
        assert_eq!(identified.fingerprint, Fingerprint::of_bytes(b"pixels"));
        assert!(identified.record.models.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn identical_bytes_merge_into_one_record() {
        let (store, content) = adapter();
        let first = content
            .identify_or_create(&Fingerprint::of_bytes(b"pixels"), "a.png", "alice")
            .await
            .unwrap();
        let second = content
            .identify_or_create(&Fingerprint::of_bytes(b"pixels"), "b.jpg", "bob")
            .await
            .unwrap();
        let third = content
            .identify_or_create(&Fingerprint::of_bytes(b"pixels"), "a.png", "alice")
            .await
            .unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(!second.created);
        assert!(!third.created);
        assert_eq!(store.len(), 1);
        assert_eq!(
            third.record.file_names,
            BTreeSet::from(["a.png".to_string(), "b.jpg".to_string()])
        );
        assert_eq!(
            third.record.users,
            BTreeSet::from(["alice".to_string(), "bob".to_string()])
        );
    }

    #[tokio::test]
    async fn different_bytes_get_different_records() {
        let (store, content) = adapter();
        let a = content
            .identify_or_create(&Fingerprint::of_bytes(b"one"), "x.png", "u")
            .await
            .unwrap();
        let b = content
            .identify_or_create(&Fingerprint::of_bytes(b"two"), "x.png", "u")
            .await
            .unwrap();

        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(store.len(), 2);
    }
}
