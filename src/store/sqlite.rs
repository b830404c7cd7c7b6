use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::DocumentStore;
use crate::errors::StoreError;
use crate::sync::model::{
    FieldValues, Installation, NewInstallation, Role, Sector, Status, UserAccount, WriteOp,
};
use crate::sync::reconcile::STORE_BATCH_LIMIT;

/// Async-safe handle to the portal database.
///
/// Wraps `PortalDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<PortalDb>>,
}

impl DbHandle {
    pub fn new(db: PortalDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut PortalDb) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

pub struct PortalDb {
    conn: Connection,
}

impl PortalDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS installations (
                    id TEXT PRIMARY KEY,
                    secteur TEXT NOT NULL,
                    code_client TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'awaiting appointment',
                    fields TEXT NOT NULL DEFAULT '{}',
                    seq INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    role TEXT NOT NULL DEFAULT 'user',
                    refresh_token TEXT,
                    seq INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_installations_sector
                    ON installations(secteur, seq);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    fn next_seq(&self, table: &str) -> Result<i64, StoreError> {
        let sql = format!("SELECT COALESCE(MAX(seq), 0) + 1 FROM {}", table);
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    // ── Installations ─────────────────────────────────────────────────

    pub fn list_installations(&self, sector: Sector) -> Result<Vec<Installation>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, code_client, secteur, status, fields, created_at, updated_at
             FROM installations WHERE secteur = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![sector.as_str()], |row| {
                Ok(RawInstallation {
                    id: row.get(0)?,
                    code_client: row.get(1)?,
                    secteur: row.get(2)?,
                    status: row.get(3)?,
                    fields: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawInstallation::into_installation).collect()
    }

    pub fn get_installation(&self, id: &str) -> Result<Option<Installation>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, code_client, secteur, status, fields, created_at, updated_at
                 FROM installations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(RawInstallation {
                        id: row.get(0)?,
                        code_client: row.get(1)?,
                        secteur: row.get(2)?,
                        status: row.get(3)?,
                        fields: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        raw.map(RawInstallation::into_installation).transpose()
    }

    pub fn insert_installation(&self, record: &NewInstallation) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let fields = serde_json::to_string(&record.fields)?;
        let seq = self.next_seq("installations")?;
        self.conn.execute(
            "INSERT INTO installations
                (id, secteur, code_client, status, fields, seq, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                record.secteur.as_str(),
                record.code_client,
                record.status.as_str(),
                fields,
                seq,
                now
            ],
        )?;
        Ok(id)
    }

    /// Insert a fully formed record, keeping its id and timestamps.
    pub fn import_installation(&self, record: &Installation) -> Result<(), StoreError> {
        let fields = serde_json::to_string(&record.fields)?;
        let seq = self.next_seq("installations")?;
        self.conn.execute(
            "INSERT INTO installations
                (id, secteur, code_client, status, fields, seq, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.secteur.as_str(),
                record.code_client,
                record.status.as_str(),
                fields,
                seq,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Apply every op in one transaction; any failure rolls the batch back.
    pub fn commit_batch(&mut self, ops: &[WriteOp]) -> Result<(), StoreError> {
        if ops.len() > STORE_BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                ops: ops.len(),
                limit: STORE_BATCH_LIMIT,
            });
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for op in ops {
            match op {
                WriteOp::Update { id, patch } => {
                    let current: Option<String> = tx
                        .query_row(
                            "SELECT fields FROM installations WHERE id = ?1",
                            params![id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let current = current.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
                    let mut fields: FieldValues = serde_json::from_str(&current)?;
                    fields.extend(patch.iter().map(|(f, v)| (*f, v.clone())));
                    tx.execute(
                        "UPDATE installations SET fields = ?1, updated_at = ?2 WHERE id = ?3",
                        params![serde_json::to_string(&fields)?, now, id],
                    )?;
                }
                WriteOp::Terminate { id } => {
                    let changed = tx.execute(
                        "UPDATE installations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                        params![Status::InstallationComplete.as_str(), now, id],
                    )?;
                    if changed == 0 {
                        return Err(StoreError::NotFound { id: id.clone() });
                    }
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn list_users(&self) -> Result<Vec<UserAccount>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, email, role, refresh_token FROM users ORDER BY seq")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, email, role, refresh_token)| {
                let role = Role::from_str(&role).map_err(|e| StoreError::Database(anyhow::anyhow!(e)))?;
                Ok(UserAccount {
                    id,
                    email,
                    role,
                    refresh_token,
                })
            })
            .collect()
    }

    /// Create or update a user by email. Returns the user id.
    pub fn upsert_user(
        &self,
        email: &str,
        role: Role,
        refresh_token: Option<&str>,
    ) -> Result<String, StoreError> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE users SET role = ?1, refresh_token = ?2 WHERE id = ?3",
                    params![role.as_str(), refresh_token, id],
                )?;
                Ok(id)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let seq = self.next_seq("users")?;
                self.conn.execute(
                    "INSERT INTO users (id, email, role, refresh_token, seq)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, email, role.as_str(), refresh_token, seq],
                )?;
                Ok(id)
            }
        }
    }
}

/// Row shape before enum and JSON decoding.
struct RawInstallation {
    id: String,
    code_client: String,
    secteur: String,
    status: String,
    fields: String,
    created_at: String,
    updated_at: String,
}

impl RawInstallation {
    fn into_installation(self) -> Result<Installation, StoreError> {
        let bad = |what: &str, value: &str| {
            StoreError::Database(anyhow::anyhow!("Invalid {} '{}' on {}", what, value, self.id))
        };
        let secteur = Sector::from_str(&self.secteur).map_err(|_| bad("secteur", &self.secteur))?;
        let status = Status::from_str(&self.status).map_err(|_| bad("status", &self.status))?;
        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| bad("createdAt", &self.created_at))?;
        let updated_at = parse_timestamp(&self.updated_at).ok_or_else(|| bad("updatedAt", &self.updated_at))?;
        let fields: FieldValues = serde_json::from_str(&self.fields)?;
        Ok(Installation {
            id: self.id,
            code_client: self.code_client,
            secteur,
            status,
            fields,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// SQLite-backed `DocumentStore`.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbHandle,
}

impl SqliteStore {
    /// Open the database file, creating parent directories as needed.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let db = PortalDb::new(path)?;
        Ok(Self::from_db(db))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_db(PortalDb::new_in_memory()?))
    }

    pub fn from_db(db: PortalDb) -> Self {
        Self {
            db: DbHandle::new(db),
        }
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn list_installations(&self, sector: Sector) -> Result<Vec<Installation>, StoreError> {
        self.db.call(move |db| db.list_installations(sector)).await
    }

    async fn insert_installation(&self, record: &NewInstallation) -> Result<String, StoreError> {
        let record = record.clone();
        self.db.call(move |db| db.insert_installation(&record)).await
    }

    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<(), StoreError> {
        let ops = ops.to_vec();
        self.db.call(move |db| db.commit_batch(&ops)).await
    }

    async fn list_users(&self) -> Result<Vec<UserAccount>, StoreError> {
        self.db.call(|db| db.list_users()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::Field;

    fn new_record(sector: Sector, code: &str, nom: &str) -> NewInstallation {
        let mut fields = FieldValues::new();
        fields.insert(Field::Nom, Some(nom.to_string()));
        fields.insert(Field::Ville, None);
        NewInstallation {
            code_client: code.to_string(),
            secteur: sector,
            status: Status::AwaitingAppointment,
            fields,
        }
    }

    #[test]
    fn insert_then_list_round_trips_fields() {
        let db = PortalDb::new_in_memory().unwrap();
        let id = db
            .insert_installation(&new_record(Sector::Haccp, "H1", "Boucherie"))
            .unwrap();

        let records = db.list_installations(Sector::Haccp).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, id);
        assert_eq!(record.code_client, "H1");
        assert_eq!(record.status, Status::AwaitingAppointment);
        assert_eq!(record.field(Field::Nom), Some("Boucherie"));
        assert_eq!(record.fields.get(&Field::Ville), Some(&None));
        assert!(db.list_installations(Sector::Chr).unwrap().is_empty());
    }

    #[test]
    fn list_preserves_insertion_order() {
        let db = PortalDb::new_in_memory().unwrap();
        for code in ["B", "A", "C"] {
            db.insert_installation(&new_record(Sector::Chr, code, code)).unwrap();
        }
        let codes: Vec<String> = db
            .list_installations(Sector::Chr)
            .unwrap()
            .into_iter()
            .map(|r| r.code_client)
            .collect();
        assert_eq!(codes, vec!["B", "A", "C"]);
    }

    #[test]
    fn commit_batch_patches_and_terminates() {
        let mut db = PortalDb::new_in_memory().unwrap();
        let a = db.insert_installation(&new_record(Sector::Chr, "A", "Old")).unwrap();
        let b = db.insert_installation(&new_record(Sector::Chr, "B", "Keep")).unwrap();

        let mut patch = FieldValues::new();
        patch.insert(Field::Nom, Some("New".into()));
        db.commit_batch(&[
            WriteOp::Update { id: a.clone(), patch },
            WriteOp::Terminate { id: b.clone() },
        ])
        .unwrap();

        let a = db.get_installation(&a).unwrap().unwrap();
        assert_eq!(a.field(Field::Nom), Some("New"));
        assert_eq!(a.status, Status::AwaitingAppointment);
        let b = db.get_installation(&b).unwrap().unwrap();
        assert_eq!(b.status, Status::InstallationComplete);
        assert_eq!(b.field(Field::Nom), Some("Keep"));
    }

    #[test]
    fn failed_batch_rolls_back() {
        let mut db = PortalDb::new_in_memory().unwrap();
        let a = db.insert_installation(&new_record(Sector::Chr, "A", "Old")).unwrap();

        let result = db.commit_batch(&[
            WriteOp::Terminate { id: a.clone() },
            WriteOp::Terminate { id: "ghost".into() },
        ]);

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        let a = db.get_installation(&a).unwrap().unwrap();
        assert_eq!(a.status, Status::AwaitingAppointment);
    }

    #[test]
    fn oversized_batch_is_rejected_before_writing() {
        let mut db = PortalDb::new_in_memory().unwrap();
        let ops: Vec<WriteOp> = (0..STORE_BATCH_LIMIT + 1)
            .map(|i| WriteOp::Terminate { id: i.to_string() })
            .collect();
        assert!(matches!(
            db.commit_batch(&ops),
            Err(StoreError::BatchTooLarge { .. })
        ));
    }

    #[test]
    fn upsert_user_updates_existing_email() {
        let db = PortalDb::new_in_memory().unwrap();
        let first = db.upsert_user("ops@example.com", Role::User, None).unwrap();
        let second = db
            .upsert_user("ops@example.com", Role::Admin, Some("rt-1"))
            .unwrap();
        assert_eq!(first, second);

        let users = db.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::Admin);
        assert_eq!(users[0].refresh_token.as_deref(), Some("rt-1"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("portal.db");
        SqliteStore::open(&path).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn store_trait_runs_on_blocking_pool() {
        let store = SqliteStore::in_memory().unwrap();
        let id = store
            .insert_installation(&new_record(Sector::Kezia, "K1", "Epicerie"))
            .await
            .unwrap();
        store
            .commit_batch(&[WriteOp::Terminate { id: id.clone() }])
            .await
            .unwrap();

        let records = store.list_installations(Sector::Kezia).await.unwrap();
        assert_eq!(records[0].status, Status::InstallationComplete);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_installation(&new_record(Sector::Tabac, "T1", "Tabac"))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_installations(Sector::Tabac).await.unwrap().len(), 1);
    }
}
