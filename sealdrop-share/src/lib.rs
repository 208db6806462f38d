//! Share record lifecycle for SealDrop.
//!
//! Stores uploaded ciphertext with the IV and salt needed to decrypt it,
//! and gates every download on:
//! - Expiry (`now < expires_at`, evaluated on every call)
//! - A download limit counted only for fully delivered transfers
//! - Atomic slot reservation, so concurrent downloads never exceed the limit
//!
//! The service never sees a password or key. Records live in SQLite,
//! ciphertext in files under `storage_dir/blobs`.

pub mod blob_store;
pub mod config;
pub mod error;
pub mod record;
pub mod record_store;
pub mod service;
pub mod sweeper;
pub mod types;

pub use config::ShareConfig;
pub use error::{ShareError, ShareResult};
pub use record::{RecordId, ShareRecord, ShareState};
pub use service::{Retrieval, ShareService};
pub use sweeper::{spawn_configured_sweeper, spawn_sweeper, SweeperHandle};
pub use types::*;
