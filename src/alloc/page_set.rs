use rustc_hash::FxHashSet;

use super::region::{Region, RegionList};
use crate::types::PageId;

/// Set of individual page ids touched by one transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageSet {
    ids: FxHashSet<PageId>,
}

impl PageSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` is in the set.
    pub fn has(&self, id: PageId) -> bool {
        self.ids.contains(&id)
    }

    /// Returns true if `id` was not yet present.
    pub fn add(&mut self, id: PageId) -> bool {
        self.ids.insert(id)
    }

    /// Adds every page of `region`.
    pub fn add_region(&mut self, region: Region) {
        self.ids.extend(region.pages());
    }

    /// Removes `id`, returning whether it was present.
    pub fn remove(&mut self, id: PageId) -> bool {
        self.ids.remove(&id)
    }

    /// Number of pages in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if the set holds no page.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Pages in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = PageId> + '_ {
        self.ids.iter().copied()
    }

    /// Keeps only the pages for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(PageId) -> bool,
    {
        self.ids.retain(|id| keep(*id));
    }

    /// Materializes the set into merged regions.
    pub fn regions(&self) -> RegionList {
        let mut ids: Vec<PageId> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        let mut regions: Vec<Region> = Vec::new();
        for id in ids {
            match regions.last_mut() {
                Some(last) if last.end() == id && last.count < u32::MAX => last.count += 1,
                _ => regions.push(Region::new(id, 1)),
            }
        }
        RegionList::from_unsorted(regions)
    }
}

impl FromIterator<PageId> for PageSet {
    fn from_iter<I: IntoIterator<Item = PageId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
