use tracing::{debug, trace};

use super::allocator::Allocator;
use super::region::Region;
use super::tx::TxAllocState;
use super::DataAllocator;
use crate::types::{AllocError, PageId, Result};

/// Grows the meta area by moving pages over from the data area.
pub struct MetaManager<'a> {
    alloc: &'a mut Allocator,
}

impl<'a> MetaManager<'a> {
    pub(crate) fn new(alloc: &'a mut Allocator) -> Self {
        Self { alloc }
    }

    /// Pages the meta area could provide, counting what it may still take
    /// from the data area.
    pub fn avail(&self, tx: &TxAllocState) -> u64 {
        self.alloc.meta_avail(tx)
    }

    /// Makes sure the meta freelist can serve `n` more pages.
    ///
    /// The area grows to the next power of two of its target usage, so
    /// consecutive small requests do not resize it every time.
    pub fn ensure(&mut self, tx: &mut TxAllocState, n: u64) -> Result<()> {
        tx.ensure_active()?;
        let total = self.alloc.meta_total;
        let avail = self.alloc.meta.freelist.avail();
        if total < avail {
            return Err(AllocError::Corruption("meta total below free meta pages"));
        }
        let used = total - avail;
        let target_used = used + n;

        let grow = tx.options.meta_grow_percentage;
        let (min, max) = meta_area_target_quota(total, target_used, grow / 2, grow);
        trace!(n, total, avail, target_used, min, max, "alloc.meta.ensure");
        debug_assert!(max >= min, "meta quota must not shrink below target");

        if max == total {
            return Ok(());
        }

        if self.try_grow(tx, max - total, false) {
            return Ok(());
        }
        let overflow = tx.options.overflow_area_enabled;
        if self.try_grow(tx, min - total, overflow) {
            return Ok(());
        }

        debug!(requested = n, total, "alloc.meta.out_of_memory");
        Err(AllocError::OutOfMemory {
            requested: n,
            avail: self.avail(tx),
        })
    }

    /// Moves `count` pages from the data area into the meta area. With
    /// `with_overflow`, whatever the data area lacks is claimed past the end of
    /// the file.
    fn try_grow(&mut self, tx: &mut TxAllocState, count: u64, with_overflow: bool) -> bool {
        if count == 0 {
            return true;
        }
        let avail = self.alloc.data_avail();
        trace!(count, avail, with_overflow, "alloc.meta.try_grow");

        if avail < count {
            if !with_overflow {
                return false;
            }
            let mut moved = Vec::new();
            if avail > 0 {
                let taken = DataAllocator::new(&mut *self.alloc)
                    .alloc_regions_with(tx, avail, |r| moved.push(r));
                if taken.is_err() {
                    return false;
                }
            }
            for region in moved {
                self.move_to_meta(tx, region);
            }

            let required = count - avail;
            let Allocator { data, meta, .. } = &mut *self.alloc;
            let mut marker = meta.end_marker.max(data.end_marker);
            let mut grown = Vec::new();
            Allocator::alloc_from_area(&mut tx.meta, &mut marker, required, |r| grown.push(r));
            meta.end_marker = marker;
            for region in grown {
                meta.freelist.add_region(region);
            }
            self.alloc.meta_total += required;
            tx.stats.overflow += required;
            debug!(pages = required, end = marker.0, "alloc.meta.overflow");
            return true;
        }

        if count <= u32::MAX as u64 {
            let cont = DataAllocator::new(&mut *self.alloc).alloc_continuous_within_limit(tx, count);
            if let Some(region) = cont {
                self.move_to_meta(tx, region);
                return true;
            }
        }

        let mut moved = Vec::new();
        let Ok(n) =
            DataAllocator::new(&mut *self.alloc).alloc_regions_with(tx, count, |r| moved.push(r))
        else {
            return false;
        };
        for region in moved {
            self.move_to_meta(tx, region);
        }
        n == count
    }

    fn move_to_meta(&mut self, tx: &mut TxAllocState, region: Region) {
        tx.manager.record_move_to_meta(region);
        tx.stats.to_meta += region.count as u64;
        self.alloc.meta_total += region.count as u64;
        self.alloc.meta.freelist.add_region(region);
    }

    /// Marks a meta page as freed; it is released on commit.
    pub fn free(&mut self, tx: &mut TxAllocState, id: PageId) {
        tx.stats.meta.freed += 1;
        tx.meta.freed.add(id);
    }
}

/// Target size range `(min, max)` of the meta area for `used` pages in use.
///
/// `max` is the next power of two of `used` (at least `total`) and doubles
/// once more when usage would exceed `grow_percentage`, or `shrink_percentage`
/// when the area would otherwise shrink.
pub fn meta_area_target_quota(
    total: u64,
    used: u64,
    shrink_percentage: u32,
    grow_percentage: u32,
) -> (u64, u64) {
    let mut max = next_power_of_two(used).max(total);
    let usage = if max == 0 {
        0.0
    } else {
        100.0 * used as f64 / max as f64
    };

    let needs_grow = usage > grow_percentage as f64
        || (max < total && usage > shrink_percentage as f64);
    let min = used.max(total);
    if needs_grow {
        max *= 2;
    }
    (min, max)
}

fn next_power_of_two(n: u64) -> u64 {
    if n == 0 {
        0
    } else {
        n.checked_next_power_of_two().unwrap_or(u64::MAX)
    }
}
