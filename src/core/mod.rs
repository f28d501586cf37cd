pub mod checksum;
pub mod comparator;
pub mod engine;
pub mod hooks;
pub mod objects;
pub mod writer;

pub use checksum::{build_index, fingerprint, ChecksumIndex, ScanConfig};
pub use comparator::{classify, SyncLists, WorldStatus};
pub use engine::{SyncConfig, SyncStatus, Synchronizer, MAX_FAILED_PASSES};
pub use hooks::CompletionHook;
pub use objects::{ObjectRecord, ObjectTable};
pub use writer::WriteCoalescer;
