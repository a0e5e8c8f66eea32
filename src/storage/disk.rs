//! On-disk page files.

pub mod page_manager;

pub use page_manager::PageFileManager;
