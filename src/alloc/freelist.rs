use super::region::{AllocOrder, Region, RegionList};
use crate::types::PageId;

/// Free regions of one area plus a cached count of available pages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Freelist {
    regions: RegionList,
    avail: u64,
}

impl Freelist {
    /// Empty freelist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Freelist over `regions`, counting their pages.
    pub fn from_regions(regions: RegionList) -> Self {
        let avail = regions.count_pages();
        Self { regions, avail }
    }

    /// Free regions, sorted and merged.
    pub fn regions(&self) -> &RegionList {
        &self.regions
    }

    /// Number of free pages.
    pub fn avail(&self) -> u64 {
        self.avail
    }

    /// True if no page is free.
    pub fn is_empty(&self) -> bool {
        self.avail == 0
    }

    /// Highest free region.
    pub fn last_region(&self) -> Option<Region> {
        self.regions.last().copied()
    }

    /// Returns `region` to the freelist, merging with its neighbours.
    pub fn add_region(&mut self, region: Region) {
        self.regions.add(region);
        self.avail += region.count as u64;
    }

    /// Returns every region of `regions`.
    pub fn add_regions(&mut self, regions: &RegionList) {
        for region in regions {
            self.add_region(*region);
        }
    }

    /// Removes the pages of `region` that are free. Returns how many were removed.
    pub fn remove_region(&mut self, region: Region) -> u64 {
        let removed = self.regions.remove(region);
        self.avail -= removed;
        removed
    }

    /// Drops every free page at or past `from`.
    pub fn truncate_from(&mut self, from: PageId) -> u64 {
        let dropped = self.regions.truncate_from(from);
        self.avail -= dropped;
        dropped
    }

    /// Takes a run of `n` pages, or `None` if no free region is large enough.
    pub fn alloc_continuous_region(&mut self, order: AllocOrder, n: u64) -> Option<Region> {
        if self.avail < n {
            return None;
        }
        let region = self.regions.alloc_continuous(order, n)?;
        self.avail -= region.count as u64;
        Some(region)
    }

    /// Takes up to `n` pages from the given end, calling `f` once per region.
    ///
    /// Returns the number of pages taken.
    pub fn alloc_regions_with<F>(&mut self, order: AllocOrder, n: u64, f: F) -> u64
    where
        F: FnMut(Region),
    {
        let taken = self.regions.alloc_regions_with(order, n, f);
        self.avail -= taken;
        taken
    }

    /// Replaces the contents with `regions`.
    pub fn replace(&mut self, regions: RegionList) {
        self.avail = regions.count_pages();
        self.regions = regions;
    }
}
