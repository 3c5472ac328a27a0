//! Durable state of the recommendation engine: the append-only vector
//! store, the sync cursor, the persisted index artifact, and the delta sync
//! that is their single writer.

pub mod artifact;
pub mod cursor;
mod persistence;
pub mod store;
pub mod sync;
pub mod task;

pub use artifact::{load_or_build, IndexArtifact};
pub use cursor::SyncCursor;
pub use store::VectorStore;
pub use sync::{
    BatchOutcome, DeltaSync, SyncOutcome, SyncPlan, SyncReport, CURSOR_FILE, INDEX_FILE, LOCK_FILE,
    STORE_DIR,
};
pub use task::SyncTask;
