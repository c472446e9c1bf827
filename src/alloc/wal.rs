use tracing::trace;

use super::allocator::{alloc_cont_from_freelist, alloc_from_freelist, Allocator};
use super::region::{AllocOrder, Region, RegionList};
use super::tx::TxAllocState;
use super::MetaManager;
use crate::types::{AllocError, PageId, Result};

/// Serves single short-lived pages for write-ahead records from the front of
/// the meta freelist.
pub struct WalAllocator<'a> {
    alloc: &'a mut Allocator,
}

impl<'a> WalAllocator<'a> {
    pub(crate) fn new(alloc: &'a mut Allocator) -> Self {
        Self { alloc }
    }

    /// Pages the meta area can still provide.
    pub fn avail(&self, tx: &TxAllocState) -> u64 {
        self.alloc.meta_avail(tx)
    }

    /// Allocates one page, growing the meta area first if needed.
    pub fn alloc(&mut self, tx: &mut TxAllocState) -> Result<PageId> {
        MetaManager::new(&mut *self.alloc).ensure(tx, 1)?;

        // smallest fitting region keeps larger runs intact
        let region =
            alloc_cont_from_freelist(&mut self.alloc.meta.freelist, &mut tx.meta, AllocOrder::Front, 1)
                .ok_or(AllocError::OutOfMemory {
                    requested: 1,
                    avail: 0,
                })?;
        tx.stats.meta.alloc += 1;
        trace!(page = region.id.0, "alloc.wal.alloc");
        Ok(region.id)
    }

    /// Allocates `n` pages from the front of the meta freelist, calling `f`
    /// once per contiguous chunk.
    pub fn alloc_regions_with<F>(&mut self, tx: &mut TxAllocState, n: u64, f: F) -> Result<u64>
    where
        F: FnMut(Region),
    {
        MetaManager::new(&mut *self.alloc).ensure(tx, n)?;
        let got = alloc_from_freelist(&mut self.alloc.meta.freelist, &mut tx.meta, AllocOrder::Front, n, f);
        tx.stats.meta.alloc += got;
        Ok(got)
    }

    /// Releases a WAL page on commit.
    pub fn free(&mut self, tx: &mut TxAllocState, id: PageId) {
        MetaManager::new(&mut *self.alloc).free(tx, id);
    }
}

/// Serves pages for the serialized freelist from the end of the meta freelist.
pub struct MetaAllocator<'a> {
    alloc: &'a mut Allocator,
}

impl<'a> MetaAllocator<'a> {
    pub(crate) fn new(alloc: &'a mut Allocator) -> Self {
        Self { alloc }
    }

    /// Pages the meta area can still provide.
    pub fn avail(&self, tx: &TxAllocState) -> u64 {
        self.alloc.meta_avail(tx)
    }

    /// Allocates `n` pages from the end of the meta freelist, calling `f` per region.
    pub fn alloc_regions_with<F>(&mut self, tx: &mut TxAllocState, n: u64, f: F) -> Result<u64>
    where
        F: FnMut(Region),
    {
        MetaManager::new(&mut *self.alloc).ensure(tx, n)?;
        let got = alloc_from_freelist(&mut self.alloc.meta.freelist, &mut tx.meta, AllocOrder::End, n, f);
        tx.stats.meta.alloc += got;
        Ok(got)
    }

    /// Allocates `n` pages and returns them as a merged list.
    pub fn alloc_regions(&mut self, tx: &mut TxAllocState, n: u64) -> Result<RegionList> {
        let mut regions = Vec::new();
        let got = self.alloc_regions_with(tx, n, |r| regions.push(r))?;
        if got < n {
            return Err(AllocError::OutOfMemory {
                requested: n,
                avail: got,
            });
        }
        Ok(RegionList::from_unsorted(regions))
    }

    /// Releases a meta page on commit.
    pub fn free(&mut self, tx: &mut TxAllocState, id: PageId) {
        MetaManager::new(&mut *self.alloc).free(tx, id);
    }

    /// Releases every page of `ids` on commit.
    pub fn free_all<I>(&mut self, tx: &mut TxAllocState, ids: I)
    where
        I: IntoIterator<Item = PageId>,
    {
        for id in ids {
            self.free(tx, id);
        }
    }

    /// Releases every page of `regions` on commit.
    pub fn free_regions(&mut self, tx: &mut TxAllocState, regions: &RegionList) {
        self.free_all(tx, regions.pages());
    }
}
