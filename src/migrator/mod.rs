//! Migrator module
//!
//! Moves device-only cache entries into the remote tier on first login.

mod engine;

pub use engine::{
    migration_key, MigrationConfig, MigrationCoordinator, MigrationRecord, MigrationStatus,
};
