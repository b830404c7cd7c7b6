use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::DocumentStore;
use crate::errors::StoreError;
use crate::sync::model::{
    Installation, NewInstallation, Sector, Status, UserAccount, WriteOp,
};
use crate::sync::reconcile::STORE_BATCH_LIMIT;

#[derive(Default)]
struct MemoryState {
    installations: Vec<Installation>,
    users: Vec<UserAccount>,
    next_id: u64,
    fail_commits: bool,
    fail_list_for: HashSet<Sector>,
    fail_inserts_for: HashSet<String>,
    commits: usize,
}

/// In-memory `DocumentStore`. Records keep insertion order, so listing is
/// deterministic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Seed a record as-is, keeping its id and timestamps.
    pub fn seed_installation(&self, record: Installation) {
        if let Ok(mut state) = self.lock() {
            state.installations.push(record);
        }
    }

    pub fn seed_user(&self, user: UserAccount) {
        if let Ok(mut state) = self.lock() {
            state.users.push(user);
        }
    }

    /// Make every subsequent `commit_batch` fail.
    pub fn fail_commits(&self, fail: bool) {
        if let Ok(mut state) = self.lock() {
            state.fail_commits = fail;
        }
    }

    /// Make `list_installations` fail for one sector.
    pub fn fail_list_for(&self, sector: Sector) {
        if let Ok(mut state) = self.lock() {
            state.fail_list_for.insert(sector);
        }
    }

    /// Make inserting this `codeClient` fail.
    pub fn fail_insert_for(&self, code_client: &str) {
        if let Ok(mut state) = self.lock() {
            state.fail_inserts_for.insert(code_client.to_string());
        }
    }

    /// Snapshot of every stored installation.
    pub fn installations(&self) -> Vec<Installation> {
        self.lock()
            .map(|state| state.installations.clone())
            .unwrap_or_default()
    }

    pub fn find(&self, sector: Sector, code_client: &str) -> Option<Installation> {
        self.installations()
            .into_iter()
            .find(|r| r.secteur == sector && r.code_client == code_client)
    }

    /// Number of successful batch commits.
    pub fn commit_count(&self) -> usize {
        self.lock().map(|state| state.commits).unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_installations(&self, sector: Sector) -> Result<Vec<Installation>, StoreError> {
        let state = self.lock()?;
        if state.fail_list_for.contains(&sector) {
            return Err(StoreError::Injected(format!("list {}", sector)));
        }
        Ok(state
            .installations
            .iter()
            .filter(|r| r.secteur == sector)
            .cloned()
            .collect())
    }

    async fn insert_installation(&self, record: &NewInstallation) -> Result<String, StoreError> {
        let mut state = self.lock()?;
        if state.fail_inserts_for.contains(&record.code_client) {
            return Err(StoreError::Injected(format!("insert {}", record.code_client)));
        }
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        let now = Utc::now();
        state.installations.push(Installation {
            id: id.clone(),
            code_client: record.code_client.clone(),
            secteur: record.secteur,
            status: record.status,
            fields: record.fields.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        if ops.len() > STORE_BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                ops: ops.len(),
                limit: STORE_BATCH_LIMIT,
            });
        }
        let mut state = self.lock()?;
        if state.fail_commits {
            return Err(StoreError::Injected("commit".into()));
        }

        // Validate every target first so the batch is all-or-nothing.
        for op in ops {
            if !state.installations.iter().any(|r| r.id == op.id()) {
                return Err(StoreError::NotFound {
                    id: op.id().to_string(),
                });
            }
        }

        let now = Utc::now();
        for op in ops {
            if let Some(record) = state.installations.iter_mut().find(|r| r.id == op.id()) {
                match op {
                    WriteOp::Update { patch, .. } => {
                        record
                            .fields
                            .extend(patch.iter().map(|(f, v)| (*f, v.clone())));
                    }
                    WriteOp::Terminate { .. } => record.status = Status::InstallationComplete,
                }
                record.updated_at = now;
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserAccount>, StoreError> {
        Ok(self.lock()?.users.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::{Field, FieldValues};

    fn new_record(code: &str) -> NewInstallation {
        let mut fields = FieldValues::new();
        fields.insert(Field::Nom, Some(format!("Client {}", code)));
        NewInstallation {
            code_client: code.to_string(),
            secteur: Sector::Chr,
            status: Status::AwaitingAppointment,
            fields,
        }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_lists_by_sector() {
        let store = MemoryStore::new();
        let a = store.insert_installation(&new_record("C1")).await.unwrap();
        let b = store.insert_installation(&new_record("C2")).await.unwrap();
        assert_ne!(a, b);

        assert_eq!(store.list_installations(Sector::Chr).await.unwrap().len(), 2);
        assert!(store.list_installations(Sector::Tabac).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_batch_applies_updates_and_terminations() {
        let store = MemoryStore::new();
        let a = store.insert_installation(&new_record("C1")).await.unwrap();
        let b = store.insert_installation(&new_record("C2")).await.unwrap();

        let mut patch = FieldValues::new();
        patch.insert(Field::Ville, Some("Lyon".into()));
        store
            .commit_batch(&[
                WriteOp::Update { id: a.clone(), patch },
                WriteOp::Terminate { id: b.clone() },
            ])
            .await
            .unwrap();

        let c1 = store.find(Sector::Chr, "C1").unwrap();
        assert_eq!(c1.field(Field::Ville), Some("Lyon"));
        assert_eq!(c1.field(Field::Nom), Some("Client C1"));
        assert_eq!(
            store.find(Sector::Chr, "C2").unwrap().status,
            Status::InstallationComplete
        );
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn commit_batch_with_unknown_id_changes_nothing() {
        let store = MemoryStore::new();
        let a = store.insert_installation(&new_record("C1")).await.unwrap();

        let result = store
            .commit_batch(&[
                WriteOp::Terminate { id: a },
                WriteOp::Terminate { id: "missing".into() },
            ])
            .await;

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert_eq!(
            store.find(Sector::Chr, "C1").unwrap().status,
            Status::AwaitingAppointment
        );
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let store = MemoryStore::new();
        let ops: Vec<WriteOp> = (0..501)
            .map(|i| WriteOp::Terminate { id: i.to_string() })
            .collect();
        let result = store.commit_batch(&ops).await;
        assert!(matches!(result, Err(StoreError::BatchTooLarge { ops: 501, .. })));
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let store = MemoryStore::new();
        store.fail_commits(true);
        store.fail_list_for(Sector::Kezia);
        store.fail_insert_for("BAD");

        assert!(store.commit_batch(&[]).await.is_err());
        assert!(store.list_installations(Sector::Kezia).await.is_err());
        assert!(store.insert_installation(&new_record("BAD")).await.is_err());
        assert!(store.insert_installation(&new_record("OK")).await.is_ok());
    }
}
