use tracing::{debug, trace};

use super::allocator::{alloc_cont_from_freelist, alloc_from_freelist, Allocator, RESERVED_PAGES};
use super::region::{AllocOrder, Region};
use super::tx::TxAllocState;
use crate::types::{AllocError, PageId, Result};

/// Serves ordinary content pages from the data area.
pub struct DataAllocator<'a> {
    alloc: &'a mut Allocator,
}

impl<'a> DataAllocator<'a> {
    pub(crate) fn new(alloc: &'a mut Allocator) -> Self {
        Self { alloc }
    }

    /// Pages left in the data area, or [`NO_LIMIT`](super::NO_LIMIT).
    pub fn avail(&self, _tx: &TxAllocState) -> u64 {
        self.alloc.data_avail()
    }

    /// Allocates one contiguous run of `n` pages.
    ///
    /// The freelist is searched first, then the area grows. If both fail and
    /// the transaction allows it, the run is taken from the overflow area
    /// past `max_pages`.
    pub fn alloc_continuous_region(&mut self, tx: &mut TxAllocState, n: u64) -> Result<Region> {
        tx.ensure_active()?;
        if n == 0 || n > u32::MAX as u64 {
            return Err(AllocError::Invalid("continuous region size out of range"));
        }

        let avail = self.alloc.data_avail();
        if avail >= n {
            if let Some(region) = self.alloc_continuous_within_limit(tx, n) {
                return Ok(region);
            }
        }

        if tx.options.overflow_area_enabled {
            let mut got = Region::NULL;
            self.alloc_overflow(tx, n, |r| got = r);
            tx.stats.data.alloc += n;
            return Ok(got);
        }

        debug!(requested = n, avail, "alloc.data.out_of_memory");
        Err(AllocError::OutOfMemory {
            requested: n,
            avail,
        })
    }

    /// Continuous allocation below `max_pages` only.
    pub(crate) fn alloc_continuous_within_limit(
        &mut self,
        tx: &mut TxAllocState,
        n: u64,
    ) -> Option<Region> {
        let Allocator {
            data,
            meta,
            max_pages,
            ..
        } = &mut *self.alloc;

        if let Some(region) =
            alloc_cont_from_freelist(&mut data.freelist, &mut tx.data, AllocOrder::Front, n)
        {
            trace!(region = %region, "alloc.data.from_freelist");
            tx.stats.data.alloc += n;
            return Some(region);
        }

        // pages between the data and meta end markers belong to the meta area
        let start = data.end_marker.max(meta.end_marker);
        if *max_pages != 0 && max_pages.saturating_sub(start.0) < n {
            return None;
        }
        data.end_marker = start;
        let mut got = None;
        Allocator::alloc_from_area(&mut tx.data, &mut data.end_marker, n, |r| got = Some(r));
        if meta.end_marker < data.end_marker {
            meta.end_marker = data.end_marker;
        }
        trace!(end = data.end_marker.0, "alloc.data.grow");
        tx.stats.data.alloc += n;
        got
    }

    /// Allocates `n` pages, calling `f` once per contiguous chunk. Freelist
    /// pages are used first, the remainder grows the area.
    ///
    /// Nothing is allocated unless all `n` pages are available.
    pub fn alloc_regions_with<F>(&mut self, tx: &mut TxAllocState, n: u64, mut f: F) -> Result<u64>
    where
        F: FnMut(Region),
    {
        tx.ensure_active()?;
        let avail = self.alloc.data_avail();
        if avail < n && !tx.options.overflow_area_enabled {
            debug!(requested = n, avail, "alloc.data.out_of_memory");
            return Err(AllocError::OutOfMemory {
                requested: n,
                avail,
            });
        }

        let Allocator {
            data,
            meta,
            max_pages,
            ..
        } = &mut *self.alloc;

        let mut remaining = n;
        remaining -= alloc_from_freelist(
            &mut data.freelist,
            &mut tx.data,
            AllocOrder::Front,
            remaining,
            &mut f,
        );

        if remaining > 0 {
            data.end_marker = data.end_marker.max(meta.end_marker);
            let area_avail = if *max_pages == 0 {
                remaining
            } else {
                max_pages.saturating_sub(data.end_marker.0).min(remaining)
            };
            Allocator::alloc_from_area(&mut tx.data, &mut data.end_marker, area_avail, &mut f);
            if meta.end_marker < data.end_marker {
                meta.end_marker = data.end_marker;
            }
            remaining -= area_avail;
        }

        if remaining > 0 {
            self.alloc_overflow(tx, remaining, &mut f);
        }
        tx.stats.data.alloc += n;
        Ok(n)
    }

    /// Claims `n` pages past both end markers.
    fn alloc_overflow<F>(&mut self, tx: &mut TxAllocState, n: u64, f: F)
    where
        F: FnMut(Region),
    {
        let Allocator { data, meta, .. } = &mut *self.alloc;
        let mut marker = data.end_marker.max(meta.end_marker);
        Allocator::alloc_from_area(&mut tx.data, &mut marker, n, f);
        data.end_marker = marker;
        meta.end_marker = marker;
        tx.stats.overflow += n;
        debug!(pages = n, end = marker.0, "alloc.data.overflow");
    }

    /// Releases a data page.
    ///
    /// Pages allocated past the end marker within this transaction return to
    /// the freelist at once and may shrink the end marker again. Any other
    /// page is only released on commit.
    ///
    /// # Panics
    ///
    /// If `id` lies outside `[2, end_marker)`.
    pub fn free(&mut self, tx: &mut TxAllocState, id: PageId) {
        let end_marker = self.alloc.data.end_marker;
        if id.0 < RESERVED_PAGES || id >= end_marker {
            panic!("{}", AllocError::InvalidFree { id, end_marker });
        }
        tx.stats.data.freed += 1;

        if !tx.data.new.remove(id) {
            tx.data.freed.add(id);
            return;
        }

        let Allocator { data, meta, .. } = &mut *self.alloc;
        data.freelist.add_region(Region::new(id, 1));
        if id < tx.data.end_marker {
            return;
        }

        let Some(last) = data.freelist.last_region() else {
            return;
        };
        if last.end() < data.end_marker {
            return;
        }

        let start = last.id.max(tx.data.end_marker);
        let old_end = data.end_marker;
        data.freelist.truncate_from(start);
        data.end_marker = start;
        if meta.end_marker == old_end {
            meta.end_marker = start.max(tx.meta.end_marker);
        }
        trace!(end = start.0, "alloc.data.shrink");
    }
}
