//! # granite-storage
//!
//! The storage layer of the Granite engine: typed paged files, an
//! in-memory page abstraction with pin/dirty/LSN bookkeeping, a buffer
//! manager, sequential cross-page cursors, and slotted-page heap tuple
//! files with a free-page list.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              HeapFile / HeapFileManager      │
//! │   (slotted pages, free list, tuples, stats)  │
//! └──────────────────────────────────────────────┘
//!                │                    │
//!                ▼                    ▼
//! ┌────────────────────┐   ┌─────────────────────┐
//! │   BufferManager    │   │     FileCursor      │
//! │ (pin/unpin, evict, │   │ (sequential reader/ │
//! │   dirty tracking)  │   │  writer over pages) │
//! └────────────────────┘   └─────────────────────┘
//!                │                    │
//!                └────────┬───────────┘
//!                         ▼
//!              ┌─────────────────────┐
//!              │     FileManager     │
//!              │ (typed paged files) │
//!              └─────────────────────┘
//! ```
//!
//! Write-ahead logging is layered on top of this crate; the
//! [`buffer::WalSync`] and [`heap::PageWriteLogger`] traits are the
//! seams through which the transaction manager hooks in.

#![warn(clippy::all)]

pub mod buffer;
pub mod cursor;
pub mod file;
pub mod heap;
pub mod page;
pub mod relations;

pub use buffer::{BufferManager, WalSync};
pub use cursor::FileCursor;
pub use file::{DbFile, DbFileType, FileManager};
pub use heap::{HeapFile, HeapFileManager, PageTuple, PageWriteLogger, Tuple};
pub use page::{DbPage, PinnedPage};
pub use relations::{ColumnInfo, ColumnType, LiteralTuple, Schema, TableStats, Value};
