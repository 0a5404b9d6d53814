//! CLI subcommands.

pub mod advisors;
pub mod ingest;
pub mod serve;
pub mod supervise;

use std::path::PathBuf;

/// Default store URL under the Mondrian home directory.
pub fn default_store_url() -> String {
    format!(
        "sqlite:{}",
        mondrian_logging::mondrian_home()
            .join("mondrian.db")
            .display()
    )
}

/// Default adapter root under the Mondrian home directory.
pub fn default_adapter_root() -> PathBuf {
    mondrian_logging::mondrian_home().join("adapters")
}
