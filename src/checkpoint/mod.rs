//! Durable conversation snapshots.
//!
//! - `backend`: append-only row storage (SQLite and in-memory)
//! - `store`: user-scoped keys, versioning and ownership checks

pub mod backend;
pub mod store;

pub use backend::{BackendError, CheckpointBackend, CheckpointRow, MemoryBackend, SqliteBackend};
pub use store::{Checkpoint, CheckpointError, CheckpointStore};
