pub mod config;
pub mod credentials;
pub mod errors;
pub mod logging;
pub mod server;
pub mod sheets;
pub mod store;
pub mod sync;
