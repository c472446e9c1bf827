//! Transactional page allocator.
//!
//! The file is split into two logical areas sharing one page id space: the
//! data area serves content pages, the meta area serves bookkeeping pages
//! (write-ahead records and the persisted freelist). Every write transaction
//! records its allocations in a [`TxAllocState`] and either commits them
//! through the multi-phase protocol in [`commit`] or rolls them back.
//!
//! A typical write transaction:
//!
//! ```
//! use txalloc::{Allocator, AllocatorOptions, MetaPage};
//!
//! let opts = AllocatorOptions { max_pages: 100, ..AllocatorOptions::default() };
//! let mut alloc = Allocator::new(&opts)?;
//! let mut tx = alloc.make_tx_alloc_state(false, 0);
//! alloc.data_allocator().alloc_regions_with(&mut tx, 10, |_region| {})?;
//!
//! let mut st = alloc.file_commit_prepare(&mut tx, false)?;
//! alloc.file_commit_alloc(&mut tx, &mut st)?;
//! alloc.file_commit_serialize(&st, |_id, _page| Ok(()))?;
//! let mut meta = MetaPage::new(opts.page_size, 0);
//! alloc.file_commit_meta(&st, &mut meta);
//! alloc.commit(&mut tx, st)?;
//! assert_eq!(alloc.data_area().end_marker().0, 12);
//! # Ok::<(), txalloc::AllocError>(())
//! ```

#![forbid(unsafe_code)]

mod allocator;
mod area;
/// Freelist page codec.
pub mod codec;
/// Commit phases.
pub mod commit;
mod data;
mod freelist;
mod manager;
/// Meta page codec.
pub mod meta_page;
mod page_set;
mod region;
mod tx;
mod wal;

pub use allocator::{Allocator, AllocatorStats, Bootstrap, NO_LIMIT, RESERVED_PAGES};
pub use area::AllocArea;
pub use codec::{read_free_list, FreelistReader, PageSource};
pub use commit::{release_overflow_pages, AllocCommitState, OverflowRelease};
pub use data::DataAllocator;
pub use freelist::Freelist;
pub use manager::{meta_area_target_quota, MetaManager};
pub use meta_page::MetaPage;
pub use page_set::PageSet;
pub use region::{AllocOrder, Region, RegionList};
pub use tx::{
    Area, AreaStats, RegionState, TxAllocOptions, TxAllocState, TxAllocStats, TxArea,
    TxAreaManageState, DEFAULT_META_GROW_PERCENTAGE,
};
pub use wal::{MetaAllocator, WalAllocator};
