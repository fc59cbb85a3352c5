use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Caseflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/Caseflow/ on all platforms (user-visible, plain directory)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Caseflow")
}

/// Get the case database path
pub fn database_path() -> PathBuf {
    app_data_dir().join("cases.db")
}

/// Get the blob storage directory (uploaded referral documents)
pub fn blobs_dir() -> PathBuf {
    app_data_dir().join("blobs")
}
