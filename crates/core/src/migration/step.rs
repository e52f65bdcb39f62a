use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// An executable schema or data change, applied against a target `T`
/// (a database connection inside a transaction, an in-memory model, ...).
#[async_trait]
pub trait MigrationAction<T: Send>: Send + Sync {
    async fn apply(&self, target: &mut T) -> anyhow::Result<()>;
}

/// One ordered, ledger-tracked change.
///
/// `checksum` identifies the step's definition; the ledger records it at
/// apply time so later edits to an applied step are detected as drift.
pub struct MigrationStep<T: Send> {
    pub id: String,
    pub checksum: String,
    pub action: Arc<dyn MigrationAction<T>>,
}

impl<T: Send> MigrationStep<T> {
    pub fn new(
        id: impl Into<String>,
        checksum: impl Into<String>,
        action: impl MigrationAction<T> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            checksum: checksum.into(),
            action: Arc::new(action),
        }
    }

    /// Build a step whose checksum is the digest of its source text.
    pub fn from_source(
        id: impl Into<String>,
        source: &[u8],
        action: impl MigrationAction<T> + 'static,
    ) -> Self {
        Self::new(id, checksum_of(source), action)
    }
}

impl<T: Send> Clone for MigrationStep<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            checksum: self.checksum.clone(),
            action: Arc::clone(&self.action),
        }
    }
}

impl<T: Send> fmt::Debug for MigrationStep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("id", &self.id)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

/// SHA-256 hex digest of a step's source.
pub fn checksum_of(source: &[u8]) -> String {
    let hash = Sha256::digest(source);
    format!("{hash:x}")
}
