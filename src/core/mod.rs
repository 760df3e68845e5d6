pub mod comparator;
pub mod engine;
pub mod path_map;
pub mod retry;
pub mod scanner;
pub mod sync_loop;

pub use comparator::{comparator_for, BinaryComparator, ContentComparator, DigestComparator, NoneComparator};
pub use engine::{PassReport, SyncError, TreeSynchronizer};
pub use path_map::{map_path, PathMapError, PathMapper};
pub use retry::{classify, RetryExecutor, RetryOutcome, Transience};
pub use scanner::{EntryKind, FileScanner, ScanError, TreeEntry, TreeScan};
pub use sync_loop::SyncLoop;
