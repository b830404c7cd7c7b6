//! I/O shell around `reconcile`.
//!
//! Sectors run one after the other. A sector that fails to fetch or list is
//! reported and skipped; the next sector still runs. Inserts are applied one
//! by one before the batch, and are not rolled back if the batch fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::model::Sector;
use super::reconcile::{DEFAULT_BATCH_LIMIT, StoredIndex, plan_batch, reconcile};
use crate::credentials::{Credential, resolve_credential};
use crate::errors::{SourceError, SyncError};
use crate::sheets::{SheetLocation, TabularSource};
use crate::store::DocumentStore;

/// Spreadsheet id of each sector. Ranges come from the fixed layouts.
#[derive(Debug, Clone, Default)]
pub struct SectorSources {
    ids: BTreeMap<Sector, String>,
}

impl SectorSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sector: Sector, spreadsheet_id: impl Into<String>) -> Self {
        self.ids.insert(sector, spreadsheet_id.into());
        self
    }

    pub fn location(&self, sector: Sector) -> Option<SheetLocation> {
        self.ids.get(&sector).map(|id| SheetLocation {
            spreadsheet_id: id.clone(),
            range: sector.layout().range.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectorOutcome {
    /// Every planned write landed.
    Synced,
    /// Reconciled, but some inserts or the batch commit failed.
    Partial,
    /// Nothing was written for this sector.
    Failed,
}

/// What happened to one sector.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SectorReport {
    pub sector: Sector,
    pub outcome: SectorOutcome,
    pub rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub terminated: usize,
    pub skipped_rows: usize,
    pub duplicate_rows: usize,
    pub dropped_ops: usize,
    pub insert_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SectorReport {
    fn new(sector: Sector) -> Self {
        Self {
            sector,
            outcome: SectorOutcome::Synced,
            rows: 0,
            inserted: 0,
            updated: 0,
            terminated: 0,
            skipped_rows: 0,
            duplicate_rows: 0,
            dropped_ops: 0,
            insert_errors: 0,
            error: None,
        }
    }

    fn failed(mut self, error: String) -> Self {
        self.outcome = SectorOutcome::Failed;
        self.error = Some(error);
        self
    }
}

/// Result of a full run over every sector.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SyncReport {
    pub sectors: Vec<SectorReport>,
}

impl SyncReport {
    pub fn sector(&self, sector: Sector) -> Option<&SectorReport> {
        self.sectors.iter().find(|r| r.sector == sector)
    }

    pub fn failed_sectors(&self) -> Vec<Sector> {
        self.sectors
            .iter()
            .filter(|r| r.outcome != SectorOutcome::Synced)
            .map(|r| r.sector)
            .collect()
    }

    pub fn summary(&self) -> String {
        let total = |f: fn(&SectorReport) -> usize| self.sectors.iter().map(f).sum::<usize>();
        let failed = self.failed_sectors();
        let mut msg = format!(
            "Installations synced: {} inserted, {} updated, {} terminated",
            total(|r| r.inserted),
            total(|r| r.updated),
            total(|r| r.terminated),
        );
        if !failed.is_empty() {
            let names: Vec<&str> = failed.iter().map(|s| s.as_str()).collect();
            msg.push_str(&format!(" (incomplete sectors: {})", names.join(", ")));
        }
        msg
    }
}

/// Runs the installations sync against injected collaborators.
pub struct SyncService {
    store: Arc<dyn DocumentStore>,
    sheets: Arc<dyn TabularSource>,
    sources: SectorSources,
    batch_limit: usize,
    run_lock: Mutex<()>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sheets: Arc<dyn TabularSource>,
        sources: SectorSources,
    ) -> Self {
        Self {
            store,
            sheets,
            sources,
            batch_limit: DEFAULT_BATCH_LIMIT,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }

    /// Run every sector, waiting for any run already in progress.
    pub async fn run_all(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.run_lock.lock().await;
        self.run_sectors().await
    }

    /// Run every sector, or fail with `AlreadyRunning` if another run holds
    /// the lock.
    pub async fn try_run_all(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.run_lock.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        self.run_sectors().await
    }

    async fn run_sectors(&self) -> Result<SyncReport, SyncError> {
        let credential = resolve_credential(self.store.as_ref()).await?;
        let mut sectors = Vec::with_capacity(Sector::ALL.len());
        for sector in Sector::ALL {
            sectors.push(self.run_sector(&credential, sector).await);
        }
        let report = SyncReport { sectors };
        info!(summary = %report.summary(), "installations sync finished");
        Ok(report)
    }

    /// Sync one sector. Never fails: problems are recorded in the report.
    pub async fn run_sector(&self, credential: &Credential, sector: Sector) -> SectorReport {
        let mut report = SectorReport::new(sector);

        let Some(location) = self.sources.location(sector) else {
            warn!(sector = %sector, "no spreadsheet configured, sector skipped");
            return report.failed("no spreadsheet configured".to_string());
        };

        let rows = match self.sheets.fetch(credential, &location).await {
            Ok(rows) => rows,
            Err(e) => {
                log_fetch_error(sector, &e);
                return report.failed(e.to_string());
            }
        };
        report.rows = rows.len();

        let stored = match self.store.list_installations(sector).await {
            Ok(records) => StoredIndex::from_records(records),
            Err(e) => {
                error!(sector = %sector, error = %e, "failed to load stored installations");
                return report.failed(e.to_string());
            }
        };

        let plan = reconcile(sector, &rows, &stored);
        report.skipped_rows = plan.skipped_rows;
        report.duplicate_rows = plan.duplicate_rows;

        for record in &plan.to_insert {
            match self.store.insert_installation(record).await {
                Ok(_) => report.inserted += 1,
                Err(e) => {
                    error!(
                        sector = %sector,
                        code_client = %record.code_client,
                        error = %e,
                        "failed to insert installation"
                    );
                    report.insert_errors += 1;
                }
            }
        }

        let batch = plan_batch(sector, plan.write_ops(), self.batch_limit);
        report.dropped_ops = batch.dropped;
        if !batch.ops.is_empty() {
            match self.store.commit_batch(&batch.ops).await {
                Ok(()) => {
                    let kept_updates = plan.to_update.len().min(batch.ops.len());
                    report.updated = kept_updates;
                    report.terminated = batch.ops.len() - kept_updates;
                }
                Err(e) => {
                    error!(
                        sector = %sector,
                        ops = batch.ops.len(),
                        inserted = report.inserted,
                        error = %e,
                        "batch commit failed, inserts already applied are kept"
                    );
                    report.error = Some(e.to_string());
                }
            }
        }

        if report.error.is_some() || report.insert_errors > 0 || report.dropped_ops > 0 {
            report.outcome = SectorOutcome::Partial;
        }

        info!(
            sector = %sector,
            rows = report.rows,
            inserted = report.inserted,
            updated = report.updated,
            terminated = report.terminated,
            skipped = report.skipped_rows,
            "sector synced"
        );
        report
    }
}

fn log_fetch_error(sector: Sector, err: &SourceError) {
    match err {
        SourceError::PermissionDenied { spreadsheet_id } => error!(
            sector = %sector,
            spreadsheet = %spreadsheet_id,
            "permission denied on sector spreadsheet; share it with the sync account"
        ),
        SourceError::NotFound {
            spreadsheet_id,
            range,
        } => error!(
            sector = %sector,
            spreadsheet = %spreadsheet_id,
            range = %range,
            "sector spreadsheet or range not found"
        ),
        other => error!(sector = %sector, error = %other, "failed to fetch sector rows"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::sync::model::{Installation, Role, Status, UserAccount};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    /// Sheet double keyed by spreadsheet id.
    #[derive(Default)]
    struct FakeSheets {
        rows: HashMap<String, Vec<Vec<String>>>,
        denied: Vec<String>,
    }

    #[async_trait]
    impl TabularSource for FakeSheets {
        async fn fetch(
            &self,
            _credential: &Credential,
            location: &SheetLocation,
        ) -> Result<Vec<Vec<String>>, SourceError> {
            if self.denied.contains(&location.spreadsheet_id) {
                return Err(SourceError::PermissionDenied {
                    spreadsheet_id: location.spreadsheet_id.clone(),
                });
            }
            Ok(self
                .rows
                .get(&location.spreadsheet_id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn sources() -> SectorSources {
        SectorSources::new()
            .with(Sector::Chr, "sheet-chr")
            .with(Sector::Haccp, "sheet-haccp")
            .with(Sector::Tabac, "sheet-tabac")
            .with(Sector::Kezia, "sheet-kezia")
    }

    fn admin_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.seed_user(UserAccount {
            id: "u1".into(),
            email: "admin@portal".into(),
            role: Role::Admin,
            refresh_token: Some("rt".into()),
        });
        store
    }

    fn seeded(id: &str, code: &str, sector: Sector) -> Installation {
        Installation {
            id: id.into(),
            code_client: code.into(),
            secteur: sector,
            status: Status::AwaitingAppointment,
            fields: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn sources_location_uses_fixed_range() {
        let loc = sources().location(Sector::Tabac).unwrap();
        assert_eq!(loc.spreadsheet_id, "sheet-tabac");
        assert_eq!(loc.range, "TABAC!A2:K");
        assert!(SectorSources::new().location(Sector::Chr).is_none());
    }

    #[tokio::test]
    async fn credential_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let service = SyncService::new(store, Arc::new(FakeSheets::default()), sources());
        let err = service.run_all().await.unwrap_err();
        assert!(matches!(err, SyncError::Credential(_)));
    }

    #[tokio::test]
    async fn fetch_failure_leaves_sector_untouched_and_others_run() {
        let store = admin_store();
        store.seed_installation(seeded("chr-1", "C001", Sector::Chr));
        let mut sheets = FakeSheets::default();
        sheets.denied.push("sheet-chr".into());
        sheets
            .rows
            .insert("sheet-tabac".into(), vec![row(&["T001", "Tabac du Port"])]);

        let service = SyncService::new(store.clone(), Arc::new(sheets), sources());
        let report = service.run_all().await.unwrap();

        let chr = report.sector(Sector::Chr).unwrap();
        assert_eq!(chr.outcome, SectorOutcome::Failed);
        assert!(chr.error.as_deref().unwrap().contains("Permission denied"));
        assert_eq!(
            store.find(Sector::Chr, "C001").unwrap().status,
            Status::AwaitingAppointment
        );

        assert_eq!(report.sector(Sector::Tabac).unwrap().inserted, 1);
        assert!(store.find(Sector::Tabac, "T001").is_some());
    }

    #[tokio::test]
    async fn list_failure_fails_sector_and_others_run() {
        let store = admin_store();
        store.fail_list_for(Sector::Chr);
        let mut sheets = FakeSheets::default();
        sheets
            .rows
            .insert("sheet-chr".into(), vec![row(&["", "", "", "C001", "Le Bistrot"])]);
        sheets
            .rows
            .insert("sheet-tabac".into(), vec![row(&["T001", "Tabac du Port"])]);

        let service = SyncService::new(store.clone(), Arc::new(sheets), sources());
        let report = service.run_all().await.unwrap();

        let chr = report.sector(Sector::Chr).unwrap();
        assert_eq!(chr.outcome, SectorOutcome::Failed);
        assert_eq!(chr.inserted, 0);
        assert!(chr.error.is_some());
        assert!(store.find(Sector::Chr, "C001").is_none());

        let tabac = report.sector(Sector::Tabac).unwrap();
        assert_eq!(tabac.outcome, SectorOutcome::Synced);
        assert_eq!(tabac.inserted, 1);
    }

    #[tokio::test]
    async fn unchanged_sheet_commits_nothing() {
        let store = admin_store();
        let mut sheets = FakeSheets::default();
        sheets
            .rows
            .insert("sheet-tabac".into(), vec![row(&["T001", "Tabac du Port"])]);
        let service = SyncService::new(store.clone(), Arc::new(sheets), sources());

        // First run only inserts; inserts bypass the batch.
        service.run_all().await.unwrap();
        assert_eq!(store.commit_count(), 0);

        let report = service.run_all().await.unwrap();
        assert_eq!(report.sector(Sector::Tabac).unwrap().updated, 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn changed_sheet_commits_one_batch_per_sector() {
        let store = admin_store();
        store.seed_installation(seeded("t-1", "T001", Sector::Tabac));
        store.seed_installation(seeded("t-2", "T002", Sector::Tabac));
        let mut sheets = FakeSheets::default();
        sheets
            .rows
            .insert("sheet-tabac".into(), vec![row(&["T001", "Renamed"])]);
        let service = SyncService::new(store.clone(), Arc::new(sheets), sources());

        let report = service.run_all().await.unwrap();
        let tabac = report.sector(Sector::Tabac).unwrap();
        assert_eq!(tabac.updated, 1);
        assert_eq!(tabac.terminated, 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn commit_failure_keeps_inserts() {
        let store = admin_store();
        store.seed_installation(seeded("chr-1", "C001", Sector::Chr));
        store.fail_commits(true);
        let mut sheets = FakeSheets::default();
        sheets
            .rows
            .insert("sheet-chr".into(), vec![row(&["", "", "", "C002", "Nouveau"])]);

        let service = SyncService::new(store.clone(), Arc::new(sheets), sources());
        let report = service.run_all().await.unwrap();

        let chr = report.sector(Sector::Chr).unwrap();
        assert_eq!(chr.outcome, SectorOutcome::Partial);
        assert_eq!(chr.inserted, 1);
        assert_eq!(chr.terminated, 0);
        assert!(chr.error.is_some());
        assert!(store.find(Sector::Chr, "C002").is_some());
        assert_eq!(
            store.find(Sector::Chr, "C001").unwrap().status,
            Status::AwaitingAppointment
        );
    }

    #[tokio::test]
    async fn insert_failure_is_counted_and_others_continue() {
        let store = admin_store();
        store.fail_insert_for("BAD");
        let mut sheets = FakeSheets::default();
        sheets.rows.insert(
            "sheet-kezia".into(),
            vec![row(&["", "BAD", "x"]), row(&["", "K002", "y"])],
        );

        let service = SyncService::new(store.clone(), Arc::new(sheets), sources());
        let report = service.run_all().await.unwrap();

        let kezia = report.sector(Sector::Kezia).unwrap();
        assert_eq!(kezia.insert_errors, 1);
        assert_eq!(kezia.inserted, 1);
        assert_eq!(kezia.outcome, SectorOutcome::Partial);
    }

    #[tokio::test]
    async fn batch_cap_drops_excess_terminations() {
        let store = admin_store();
        for i in 0..12 {
            store.seed_installation(seeded(&format!("id-{}", i), &format!("H{}", i), Sector::Haccp));
        }
        let service = SyncService::new(store.clone(), Arc::new(FakeSheets::default()), sources())
            .with_batch_limit(10);
        let report = service.run_all().await.unwrap();

        let haccp = report.sector(Sector::Haccp).unwrap();
        assert_eq!(haccp.terminated, 10);
        assert_eq!(haccp.dropped_ops, 2);
        let open = store
            .installations()
            .into_iter()
            .filter(|r| r.status == Status::AwaitingAppointment)
            .count();
        assert_eq!(open, 2);
    }

    #[tokio::test]
    async fn try_run_all_rejects_overlap() {
        let store = admin_store();
        let service = SyncService::new(store, Arc::new(FakeSheets::default()), sources());
        let _held = service.run_lock.lock().await;
        let err = service.try_run_all().await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning));
    }

    #[test]
    fn summary_lists_incomplete_sectors() {
        let failed = SectorReport::new(Sector::Kezia).failed("boom".into());
        let mut ok = SectorReport::new(Sector::Chr);
        ok.inserted = 2;
        ok.terminated = 1;
        let report = SyncReport {
            sectors: vec![ok, failed],
        };
        let summary = report.summary();
        assert!(summary.contains("2 inserted"));
        assert!(summary.contains("1 terminated"));
        assert!(summary.contains("incomplete sectors: kezia"));
    }
}
