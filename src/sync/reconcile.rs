//! Pure three-way diff between a sheet pull and the stored records of one
//! sector.
//!
//! `reconcile` performs no I/O: the service fetches rows and records, calls
//! it, and applies the resulting plan. Rows are matched on `codeClient`.
//!
//! | Row key        | Stored record        | Outcome                       |
//! |----------------|----------------------|-------------------------------|
//! | blank          | -                    | skipped, warning              |
//! | seen already   | -                    | duplicate, first row wins     |
//! | unknown        | none                 | insert, `awaiting appointment`|
//! | known          | any status           | patch of differing fields     |
//! | absent         | not terminal         | terminate                     |
//! | absent         | terminal             | nothing                       |

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use super::dates::normalize_date_cell;
use super::model::{FieldValues, Installation, NewInstallation, Sector, Status, WriteOp};
use super::sector::SectorLayout;

/// Hard per-batch operation ceiling of the document store.
pub const STORE_BATCH_LIMIT: usize = 500;

/// Default cap, leaving headroom under `STORE_BATCH_LIMIT`.
pub const DEFAULT_BATCH_LIMIT: usize = 490;

/// Stored records of one sector keyed by `codeClient`.
///
/// The first record for a key is canonical; later ones are counted and
/// otherwise ignored.
#[derive(Debug, Default)]
pub struct StoredIndex {
    records: Vec<Installation>,
    by_code: HashMap<String, usize>,
    duplicates: usize,
}

impl StoredIndex {
    pub fn from_records(records: Vec<Installation>) -> Self {
        let mut index = Self::default();
        for record in records {
            let code = record.code_client.trim().to_string();
            if index.by_code.contains_key(&code) {
                warn!(
                    sector = %record.secteur,
                    code_client = %code,
                    id = %record.id,
                    "duplicate stored record for codeClient, keeping the first"
                );
                index.duplicates += 1;
                continue;
            }
            index.by_code.insert(code, index.records.len());
            index.records.push(record);
        }
        index
    }

    pub fn get(&self, code_client: &str) -> Option<&Installation> {
        self.by_code.get(code_client).map(|&i| &self.records[i])
    }

    /// Canonical records in store order.
    pub fn iter(&self) -> impl Iterator<Item = &Installation> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// Fields to overwrite on an existing record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPatch {
    pub id: String,
    pub patch: FieldValues,
}

/// Everything one sector needs written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcilePlan {
    pub sector: Sector,
    pub to_insert: Vec<NewInstallation>,
    pub to_update: Vec<FieldPatch>,
    pub to_terminate: Vec<String>,
    pub skipped_rows: usize,
    pub duplicate_rows: usize,
}

impl ReconcilePlan {
    fn empty(sector: Sector) -> Self {
        Self {
            sector,
            to_insert: Vec::new(),
            to_update: Vec::new(),
            to_terminate: Vec::new(),
            skipped_rows: 0,
            duplicate_rows: 0,
        }
    }

    /// Updates followed by terminations, in the order they are committed.
    pub fn write_ops(&self) -> Vec<WriteOp> {
        self.to_update
            .iter()
            .map(|u| WriteOp::Update {
                id: u.id.clone(),
                patch: u.patch.clone(),
            })
            .chain(
                self.to_terminate
                    .iter()
                    .map(|id| WriteOp::Terminate { id: id.clone() }),
            )
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_terminate.is_empty()
    }
}

/// Map one row through a sector layout. Cells past the end of the row are
/// empty.
pub fn map_row(layout: &SectorLayout, row: &[String]) -> FieldValues {
    layout
        .columns
        .iter()
        .map(|(index, field)| {
            let raw = row.get(*index).map(|c| c.trim()).unwrap_or("");
            let value = if field.is_date() {
                normalize_date_cell(raw)
            } else if raw.is_empty() {
                None
            } else {
                Some(raw.to_string())
            };
            (*field, value)
        })
        .collect()
}

/// Diff one sector's sheet rows against its stored records.
pub fn reconcile(sector: Sector, rows: &[Vec<String>], stored: &StoredIndex) -> ReconcilePlan {
    let layout = sector.layout();
    let mut plan = ReconcilePlan::empty(sector);
    let mut seen: HashSet<String> = HashSet::new();

    for (row_index, row) in rows.iter().enumerate() {
        let Some(code_client) = layout.code_client(row) else {
            warn!(
                sector = %sector,
                row = layout.sheet_row(row_index),
                "row without codeClient skipped"
            );
            plan.skipped_rows += 1;
            continue;
        };

        if !seen.insert(code_client.to_string()) {
            warn!(
                sector = %sector,
                row = layout.sheet_row(row_index),
                code_client,
                "duplicate codeClient in sheet, keeping the first row"
            );
            plan.duplicate_rows += 1;
            continue;
        }

        let candidate = map_row(layout, row);

        match stored.get(code_client) {
            None => plan.to_insert.push(NewInstallation {
                code_client: code_client.to_string(),
                secteur: sector,
                status: Status::AwaitingAppointment,
                fields: candidate,
            }),
            Some(existing) => {
                let patch = diff_fields(layout, &candidate, existing);
                if !patch.is_empty() {
                    plan.to_update.push(FieldPatch {
                        id: existing.id.clone(),
                        patch,
                    });
                }
            }
        }
    }

    for record in stored.iter() {
        if !seen.contains(record.code_client.trim()) && !record.status.is_terminal() {
            plan.to_terminate.push(record.id.clone());
        }
    }

    plan
}

/// Sheet-owned fields whose candidate value differs from the stored one.
fn diff_fields(layout: &SectorLayout, candidate: &FieldValues, existing: &Installation) -> FieldValues {
    layout
        .diffable_fields()
        .filter_map(|field| {
            let new_value = candidate.get(&field).cloned().flatten();
            let old_value = existing.field(field);
            (new_value.as_deref() != old_value).then_some((field, new_value))
        })
        .collect()
}

/// Write ops trimmed to the batch cap.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub ops: Vec<WriteOp>,
    pub dropped: usize,
}

/// Cap a sector's write ops at `limit` (clamped to `1..=STORE_BATCH_LIMIT`).
/// Ops past the cap are dropped, not deferred.
pub fn plan_batch(sector: Sector, mut ops: Vec<WriteOp>, limit: usize) -> BatchPlan {
    let limit = limit.clamp(1, STORE_BATCH_LIMIT);
    let dropped = ops.len().saturating_sub(limit);
    if dropped > 0 {
        warn!(
            sector = %sector,
            total = ops.len(),
            limit,
            dropped,
            "batch exceeds operation cap, dropping excess operations"
        );
        ops.truncate(limit);
    }
    BatchPlan { ops, dropped }
}
