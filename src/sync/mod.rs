//! Installations sync: sheet rows in, store writes out.
//!
//! ## Module Map
//!
//! | Module      | Responsibility                                             |
//! |-------------|------------------------------------------------------------|
//! | `model`     | `Sector`, `Status`, `Field`, `Installation`, `WriteOp`     |
//! | `sector`    | Fixed per-sector range and column → field layout           |
//! | `dates`     | Sheet date strings and day serials → ISO dates             |
//! | `reconcile` | Pure diff: inserts, field patches, terminations, batch cap |
//! | `service`   | `SyncService`: fetch, list, reconcile, write, report       |

pub mod dates;
pub mod model;
pub mod reconcile;
pub mod sector;
pub mod service;

pub use model::{Field, FieldValues, Installation, NewInstallation, Sector, Status, WriteOp};
pub use reconcile::{ReconcilePlan, StoredIndex, reconcile};
pub use service::{SectorOutcome, SectorReport, SectorSources, SyncReport, SyncService};
