pub mod config;
pub mod db;
pub mod models;

pub mod cascade;
pub mod cases;
pub mod catalog;
pub mod classification;
pub mod extraction;
pub mod patients;
pub mod storage;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binary consumers. Library users bring their own
/// subscriber; calling this twice is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
