//! Transactional page allocator for single-file storage engines.
//!
//! A file is a sequence of fixed-size pages. Pages 0 and 1 hold the meta
//! pages; everything else is handed out by the [`Allocator`] to either the
//! data area or the meta area, with every change scoped to a write
//! transaction that commits atomically or rolls back.

#![warn(missing_docs)]

/// Allocator core and its transaction state.
pub mod alloc;
/// Allocator options.
pub mod config;
/// Page file harness.
pub mod file;
/// Positioned file I/O.
pub mod io;
/// Page ids, errors and the page header.
pub mod types;

pub use alloc::{
    AllocCommitState, AllocOrder, Allocator, AllocatorStats, DataAllocator, MetaAllocator,
    MetaManager, MetaPage, Region, RegionList, TxAllocOptions, TxAllocState, WalAllocator,
};
pub use config::{AllocatorOptions, ConfigError};
pub use file::PageFile;
pub use io::{FileIo, StdFileIo};
pub use types::{AllocError, PageId, Result};
