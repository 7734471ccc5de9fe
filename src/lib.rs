// Birdbox Storage - video lifecycle and storage management engine
//
// Capture-side collaborators hand finished recordings to the
// StorageController; an upload worker drives the mark_upload_* family; a
// periodic scheduler runs cleanup and stats. This crate owns the durable
// record-keeping, directory-based state partitioning, disk admission
// control, integrity quarantine and eviction policy behind those calls.

pub mod cleanup;
pub mod config;
pub mod constants;
pub mod controller;
pub mod db;
pub mod error;
pub mod model;
pub mod space;
pub mod storage;
pub mod tools;
pub mod validate;

pub use cleanup::{CleanupManager, CleanupOutcome, CleanupPlanStats};
pub use config::StorageConfig;
pub use controller::{OrphanReport, StorageCallbacks, StorageController};
pub use db::{ListOrder, MetadataManager};
pub use error::{Result, StorageError};
pub use model::{StorageStats, UploadStatus, VideoFile, VideoQuality};
pub use space::{DiskUsage, SpaceManager, SpaceState};
pub use storage::FileManager;
pub use validate::{ValidationOutcome, Validator};
