use super::freelist::Freelist;
use super::region::{Region, RegionList};
use super::tx::TxArea;
use crate::types::PageId;

/// One logical area: its high-water mark plus the free pages below it.
///
/// Every id below `end_marker` that is not on the freelist is in use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocArea {
    pub(crate) end_marker: PageId,
    pub(crate) freelist: Freelist,
}

impl AllocArea {
    pub(crate) fn new(end_marker: PageId, freelist: Freelist) -> Self {
        Self {
            end_marker,
            freelist,
        }
    }

    /// First page id not yet claimed by the area.
    pub fn end_marker(&self) -> PageId {
        self.end_marker
    }

    /// Free pages below the end marker.
    pub fn freelist(&self) -> &Freelist {
        &self.freelist
    }

    pub(crate) fn commit(&mut self, end_marker: PageId, regions: RegionList) {
        self.freelist.replace(regions);
        self.end_marker = end_marker;
    }

    /// Drops everything claimed past the transaction snapshot and returns the
    /// pages the transaction took from the freelist.
    pub(crate) fn rollback(&mut self, tx: &mut TxArea) {
        let snapshot = tx.end_marker;
        if self.end_marker > snapshot {
            let mut start = snapshot.0;
            while start < self.end_marker.0 {
                let count = (self.end_marker.0 - start).min(u32::MAX as u64) as u32;
                self.freelist.remove_region(Region::new(PageId(start), count));
                start += count as u64;
            }
        }
        tx.allocated.retain(|id| id < snapshot);
        self.freelist.add_regions(&tx.allocated.regions());
        self.end_marker = snapshot;
    }
}
