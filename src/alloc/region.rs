use std::fmt;

use crate::types::PageId;

/// Contiguous run of pages `[id, id + count)`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Region {
    /// First page of the run.
    pub id: PageId,
    /// Number of pages in the run.
    pub count: u32,
}

impl Region {
    /// The "no region" value returned by failed continuous allocations.
    pub const NULL: Region = Region {
        id: PageId(0),
        count: 0,
    };

    /// Creates a region starting at `id` spanning `count` pages.
    pub const fn new(id: PageId, count: u32) -> Self {
        Self { id, count }
    }

    /// Returns true for the null region.
    pub fn is_null(&self) -> bool {
        self.id.is_null()
    }

    /// First page id past the end of the region.
    pub fn end(&self) -> PageId {
        PageId(self.id.0 + self.count as u64)
    }

    /// Start and (exclusive) end of the region.
    pub fn range(&self) -> (PageId, PageId) {
        (self.id, self.end())
    }

    /// True if `page` lies within the region.
    pub fn contains(&self, page: PageId) -> bool {
        self.id <= page && page < self.end()
    }

    /// True if `other` starts exactly where this region ends.
    pub fn is_adjacent_to(&self, other: &Region) -> bool {
        self.end() == other.id
    }

    /// Extends `self` by `other` when the two touch.
    pub fn coalesce_with(&mut self, other: &Region) -> bool {
        if self.is_adjacent_to(other) {
            self.count += other.count;
            true
        } else {
            false
        }
    }

    /// Iterates every page id in the region.
    pub fn pages(&self) -> impl Iterator<Item = PageId> {
        let start = self.id.0;
        (start..start + self.count as u64).map(PageId)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.id.0, self.end().0)
    }
}

/// Which side of a region list allocations are served from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocOrder {
    /// Lowest page ids first.
    Front,
    /// Highest page ids first.
    End,
}

/// Regions sorted by id with no two regions overlapping or touching.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegionList {
    regions: Vec<Region>,
}

impl RegionList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from regions in any order, merging adjacent runs.
    pub fn from_unsorted(mut regions: Vec<Region>) -> Self {
        regions.retain(|r| r.count > 0);
        regions.sort_by_key(|r| r.id);
        let mut merged: Vec<Region> = Vec::with_capacity(regions.len());
        for region in regions {
            if let Some(last) = merged.last_mut() {
                debug_assert!(last.end() <= region.id, "overlapping regions {last} {region}");
                if last.end() >= region.id {
                    let end = last.end().max(region.end());
                    last.count = (end.0 - last.id.0) as u32;
                    continue;
                }
            }
            merged.push(region);
        }
        Self { regions: merged }
    }

    /// Regions in ascending id order.
    pub fn as_slice(&self) -> &[Region] {
        &self.regions
    }

    /// Number of stored regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if the list holds no pages.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterates the stored regions.
    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    /// Region with the lowest ids.
    pub fn first(&self) -> Option<&Region> {
        self.regions.first()
    }

    /// Region with the highest ids.
    pub fn last(&self) -> Option<&Region> {
        self.regions.last()
    }

    /// Total number of pages covered by the list.
    pub fn count_pages(&self) -> u64 {
        self.regions.iter().map(|r| r.count as u64).sum()
    }

    /// Iterates every page id in ascending order.
    pub fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.regions.iter().flat_map(|r| r.pages())
    }

    /// True if `page` is covered by any region.
    pub fn contains(&self, page: PageId) -> bool {
        let idx = self.regions.partition_point(|r| r.end() <= page);
        self.regions.get(idx).is_some_and(|r| r.contains(page))
    }

    /// Inserts `region`, coalescing it with its neighbours.
    pub fn add(&mut self, region: Region) {
        if region.count == 0 {
            return;
        }
        let idx = self.regions.partition_point(|r| r.id < region.id);
        debug_assert!(
            idx == 0 || self.regions[idx - 1].end() <= region.id,
            "region {region} overlaps its predecessor"
        );
        debug_assert!(
            idx == self.regions.len() || region.end() <= self.regions[idx].id,
            "region {region} overlaps its successor"
        );

        let merges_prev = idx > 0 && self.regions[idx - 1].is_adjacent_to(&region);
        let merges_next = idx < self.regions.len() && region.is_adjacent_to(&self.regions[idx]);
        match (merges_prev, merges_next) {
            (true, true) => {
                let next = self.regions.remove(idx);
                let prev = &mut self.regions[idx - 1];
                prev.count += region.count + next.count;
            }
            (true, false) => self.regions[idx - 1].count += region.count,
            (false, true) => {
                let next = &mut self.regions[idx];
                next.id = region.id;
                next.count += region.count;
            }
            (false, false) => self.regions.insert(idx, region),
        }
    }

    /// Adds every region of `other`.
    pub fn add_all(&mut self, other: &RegionList) {
        for region in other.iter() {
            self.add(*region);
        }
    }

    /// Removes every page of `region` that is present, splitting runs as needed.
    /// Returns the number of pages removed.
    pub fn remove(&mut self, region: Region) -> u64 {
        if region.count == 0 || self.regions.is_empty() {
            return 0;
        }
        let (start, end) = region.range();
        let first = self.regions.partition_point(|r| r.end() <= start);
        let mut last = first;
        while last < self.regions.len() && self.regions[last].id < end {
            last += 1;
        }
        if first == last {
            return 0;
        }

        let mut removed = 0u64;
        let mut pieces: Vec<Region> = Vec::with_capacity(2);
        for r in &self.regions[first..last] {
            let (r_start, r_end) = r.range();
            let cut_start = r_start.max(start);
            let cut_end = r_end.min(end);
            removed += cut_end.0 - cut_start.0;
            if r_start < start {
                pieces.push(Region::new(r_start, (start.0 - r_start.0) as u32));
            }
            if r_end > end {
                pieces.push(Region::new(end, (r_end.0 - end.0) as u32));
            }
        }
        self.regions.splice(first..last, pieces);
        removed
    }

    /// Drops every page with id `>= from`. Returns the number of pages dropped.
    pub fn truncate_from(&mut self, from: PageId) -> u64 {
        let keep = self.regions.partition_point(|r| r.end() <= from);
        let mut dropped: u64 = self.regions[keep..]
            .iter()
            .map(|r| r.count as u64)
            .sum();
        self.regions.truncate(keep + 1);
        if let Some(last) = self.regions.get_mut(keep) {
            if last.id < from {
                let kept = (from.0 - last.id.0) as u32;
                last.count = kept;
                dropped -= kept as u64;
            } else {
                self.regions.truncate(keep);
            }
        }
        dropped
    }

    /// Takes a single run of exactly `n` pages out of the smallest region that
    /// can hold it. Exact fits win; ties are broken by `order`.
    pub fn alloc_continuous(&mut self, order: AllocOrder, n: u64) -> Option<Region> {
        if n == 0 || n > u32::MAX as u64 {
            return None;
        }
        let mut best: Option<usize> = None;
        for (idx, region) in self.regions.iter().enumerate() {
            let count = region.count as u64;
            if count < n {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let best_count = self.regions[b].count as u64;
                    count < best_count || (count == best_count && order == AllocOrder::End)
                }
            };
            if better {
                best = Some(idx);
                if count == n && order == AllocOrder::Front {
                    break;
                }
            }
        }

        let idx = best?;
        let n = n as u32;
        let region = &mut self.regions[idx];
        let taken = match order {
            AllocOrder::Front => {
                let taken = Region::new(region.id, n);
                region.id = PageId(region.id.0 + n as u64);
                region.count -= n;
                taken
            }
            AllocOrder::End => {
                region.count -= n;
                Region::new(PageId(region.id.0 + region.count as u64), n)
            }
        };
        if region.count == 0 {
            self.regions.remove(idx);
        }
        Some(taken)
    }

    /// Takes up to `n` pages from one end of the list, calling `f` once per
    /// contiguous chunk. Returns the number of pages handed out.
    pub fn alloc_regions_with<F>(&mut self, order: AllocOrder, n: u64, mut f: F) -> u64
    where
        F: FnMut(Region),
    {
        let mut remaining = n;
        while remaining > 0 {
            let region = match order {
                AllocOrder::Front => self.regions.first_mut(),
                AllocOrder::End => self.regions.last_mut(),
            };
            let Some(region) = region else {
                break;
            };
            if region.count as u64 <= remaining {
                let taken = *region;
                match order {
                    AllocOrder::Front => {
                        self.regions.remove(0);
                    }
                    AllocOrder::End => {
                        self.regions.pop();
                    }
                }
                remaining -= taken.count as u64;
                f(taken);
            } else {
                let take = remaining as u32;
                let taken = match order {
                    AllocOrder::Front => {
                        let taken = Region::new(region.id, take);
                        region.id = PageId(region.id.0 + take as u64);
                        region.count -= take;
                        taken
                    }
                    AllocOrder::End => {
                        region.count -= take;
                        Region::new(PageId(region.id.0 + region.count as u64), take)
                    }
                };
                remaining = 0;
                f(taken);
            }
        }
        n - remaining
    }

    /// Takes up to `n` pages from the lowest ids.
    pub fn alloc_from_front(&mut self, n: u64) -> RegionList {
        let mut out = RegionList::new();
        self.alloc_regions_with(AllocOrder::Front, n, |r| out.add(r));
        out
    }

    /// Takes up to `n` pages from the highest ids.
    pub fn alloc_from_end(&mut self, n: u64) -> RegionList {
        let mut out = RegionList::new();
        self.alloc_regions_with(AllocOrder::End, n, |r| out.add(r));
        out
    }

    /// Merges two disjoint lists into a new list.
    pub fn merge(a: &RegionList, b: &RegionList) -> RegionList {
        let mut all = Vec::with_capacity(a.len() + b.len());
        all.extend_from_slice(&a.regions);
        all.extend_from_slice(&b.regions);
        RegionList::from_unsorted(all)
    }

    pub(crate) fn into_vec(self) -> Vec<Region> {
        self.regions
    }
}

impl FromIterator<Region> for RegionList {
    fn from_iter<I: IntoIterator<Item = Region>>(iter: I) -> Self {
        RegionList::from_unsorted(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RegionList {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions.iter()
    }
}
