//! Document store seam.
//!
//! The sync only needs four operations from the portal database: list one
//! sector's installations, insert a new installation, commit a bounded batch
//! of writes against existing installations, and list user accounts for
//! credential resolution.
//!
//! | Implementation | Backing                                               |
//! |----------------|-------------------------------------------------------|
//! | `SqliteStore`  | rusqlite behind `DbHandle` (blocking pool)            |
//! | `MemoryStore`  | in-process maps, with failure injection for tests     |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::sync::model::{Installation, NewInstallation, Sector, UserAccount, WriteOp};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstraction over the portal's document store.
/// Real implementation: `SqliteStore`. Test double: `MemoryStore`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Installations of one sector, in store order.
    async fn list_installations(&self, sector: Sector) -> Result<Vec<Installation>, StoreError>;

    /// Create a record and return its store-assigned id.
    async fn insert_installation(&self, record: &NewInstallation) -> Result<String, StoreError>;

    /// Apply all ops atomically. Fails with `BatchTooLarge` past
    /// `STORE_BATCH_LIMIT` ops.
    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<(), StoreError>;

    /// User accounts in store order.
    async fn list_users(&self) -> Result<Vec<UserAccount>, StoreError>;
}
