//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled       |
//! |----------|------------------------|
//! | `run`    | `Serve`, `Sync`        |
//! | `admin`  | `InitDb`, `AddUser`    |
//! | `config` | `Config`               |

pub mod admin;
pub mod config;
pub mod run;

pub use admin::{cmd_add_user, cmd_init_db};
pub use config::cmd_config;
pub use run::{cmd_serve, cmd_sync};
