//! Page storage for column data.
//!
//! - **Page**: a fixed 4KB block holding 512 little-endian `i64` slots
//! - **PageFileManager**: one file per page under the database root
//! - **BufferPool**: pinned, dirty-tracked page cache with LRU eviction
//!
//! Every page is named by a [`PageKey`]: table, page range, base or tail
//! segment, page index within the range, and physical column.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPool, PinnedPage, SharedPage};
pub use disk::PageFileManager;
pub use error::{StorageError, StorageResult};
pub use page::{Page, PageKey, Segment};
