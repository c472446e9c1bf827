use tracing::debug;

use super::allocator::Allocator;
use super::codec::{self, FreelistPrediction};
use super::meta_page::MetaPage;
use super::region::{Region, RegionList};
use super::tx::TxAllocState;
use crate::types::{AllocError, PageId, Result};

/// Free regions reserved for moves between areas while the freelist pages
/// themselves are being allocated.
const PREDICTION_HEADROOM: u64 = 2;

/// New allocator state computed while committing one transaction.
///
/// Nothing in here is visible to the live [`Allocator`] until
/// [`Allocator::commit`] swaps it in.
#[derive(Clone, Debug, Default)]
pub struct AllocCommitState {
    updated: bool,
    allocated: bool,
    alloc_regions: RegionList,
    meta_list: RegionList,
    data_list: RegionList,
    data_end_marker: PageId,
    meta_end_marker: PageId,
    meta_total: u64,
    overflow_freed: u64,
}

impl AllocCommitState {
    /// True if the transaction changed the allocator or an update was forced.
    pub fn updated(&self) -> bool {
        self.updated
    }

    /// Pages holding the new persisted freelist.
    pub fn alloc_regions(&self) -> &RegionList {
        &self.alloc_regions
    }

    /// Root of the new persisted freelist.
    pub fn freelist_root(&self) -> PageId {
        self.alloc_regions
            .first()
            .map(|r| r.id)
            .unwrap_or(PageId::NULL)
    }

    /// Data area freelist to persist.
    pub fn data_list(&self) -> &RegionList {
        &self.data_list
    }

    /// Meta area freelist to persist.
    pub fn meta_list(&self) -> &RegionList {
        &self.meta_list
    }

    /// Data area end marker to persist.
    pub fn data_end_marker(&self) -> PageId {
        self.data_end_marker
    }

    /// Meta area end marker to persist.
    pub fn meta_end_marker(&self) -> PageId {
        self.meta_end_marker
    }

    /// Pages owned by the meta area after the commit.
    pub fn meta_total(&self) -> u64 {
        self.meta_total
    }

    /// Pages past `max_pages` handed back to the file system by this commit.
    pub fn overflow_freed(&self) -> u64 {
        self.overflow_freed
    }

    /// First page id past both areas once committed.
    pub fn file_end(&self) -> PageId {
        self.data_end_marker.max(self.meta_end_marker)
    }
}

/// Result of trimming free pages off the tail of the file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverflowRelease {
    /// Remaining data area freelist.
    pub data_list: RegionList,
    /// Remaining meta area freelist.
    pub meta_list: RegionList,
    /// Data area end marker after the release.
    pub data_end_marker: PageId,
    /// Meta area end marker after the release.
    pub meta_end_marker: PageId,
    /// Data pages released.
    pub data_freed: u64,
    /// Meta pages released.
    pub meta_freed: u64,
}

/// Drops free regions past `max_pages` that reach the end of the file,
/// walking down from the highest end marker. A region straddling
/// `max_pages` is split and only its upper part released.
pub fn release_overflow_pages(
    data_list: RegionList,
    meta_list: RegionList,
    max_pages: u64,
    data_end_marker: PageId,
    meta_end_marker: PageId,
) -> OverflowRelease {
    let mut data = data_list.into_vec();
    let mut meta = meta_list.into_vec();
    let mut data_freed = 0u64;
    let mut meta_freed = 0u64;
    let mut cursor = data_end_marker.max(meta_end_marker);

    if max_pages != 0 {
        let limit = PageId(max_pages);
        while cursor > limit {
            let (list, freed) = if data.last().is_some_and(|r| r.end() == cursor) {
                (&mut data, &mut data_freed)
            } else if meta.last().is_some_and(|r| r.end() == cursor) {
                (&mut meta, &mut meta_freed)
            } else {
                break;
            };
            let Some(last) = list.pop() else {
                break;
            };
            if last.id < limit {
                list.push(Region::new(last.id, (limit.0 - last.id.0) as u32));
                *freed += last.end().0 - limit.0;
                cursor = limit;
            } else {
                *freed += last.count as u64;
                cursor = last.id;
            }
        }
    }

    OverflowRelease {
        data_list: RegionList::from_unsorted(data),
        meta_list: RegionList::from_unsorted(meta),
        data_end_marker: data_end_marker.min(cursor),
        meta_end_marker: meta_end_marker.min(cursor),
        data_freed,
        meta_freed,
    }
}

impl Allocator {
    /// First commit phase. Decides whether the freelist must be rewritten and,
    /// if so, releases the pages of the current persisted freelist into the
    /// transaction. `force` rewrites the freelist even without changes, which
    /// lets a transaction hand overflow pages back after a size reduction.
    pub fn file_commit_prepare(
        &mut self,
        tx: &mut TxAllocState,
        force: bool,
    ) -> Result<AllocCommitState> {
        tx.ensure_active()?;
        let updated = tx.updated() || force;
        if updated {
            let pages = self.freelist_pages.clone();
            self.meta_allocator().free_regions(tx, &pages);
        }
        Ok(AllocCommitState {
            updated,
            data_end_marker: self.data.end_marker,
            meta_end_marker: self.meta.end_marker,
            meta_total: self.meta_total,
            ..AllocCommitState::default()
        })
    }

    /// Second commit phase. Allocates the pages for the new freelist and
    /// computes the freelists and end markers to persist.
    ///
    /// The transaction must not allocate or free pages after this call.
    pub fn file_commit_alloc(
        &mut self,
        tx: &mut TxAllocState,
        st: &mut AllocCommitState,
    ) -> Result<()> {
        tx.ensure_active()?;
        if !st.updated {
            return Ok(());
        }

        let data_freed = tx.data.freed.regions();
        let meta_freed = tx.meta.freed.regions();

        // Overestimates: the regions taken for the freelist itself only ever
        // shrink the lists, while moves into the meta area may add entries.
        let mut prediction = FreelistPrediction::new(self.page_size);
        prediction.add_regions(&data_freed);
        prediction.add_regions(&meta_freed);
        prediction.add_regions(self.data.freelist.regions());
        prediction.add_regions(self.meta.freelist.regions());
        if prediction.entries() > 0 {
            prediction.reserve_entries(PREDICTION_HEADROOM);
        }

        let alloc_regions = match prediction.pages() {
            0 => RegionList::new(),
            n => self.meta_allocator().alloc_regions(tx, n)?,
        };

        let data_list = RegionList::merge(self.data.freelist.regions(), &data_freed);
        let meta_list = RegionList::merge(self.meta.freelist.regions(), &meta_freed);
        let released = release_overflow_pages(
            data_list,
            meta_list,
            self.max_pages,
            self.data.end_marker,
            self.meta.end_marker,
        );

        st.alloc_regions = alloc_regions;
        st.data_list = released.data_list;
        st.meta_list = released.meta_list;
        st.data_end_marker = released.data_end_marker;
        st.meta_end_marker = released.meta_end_marker;
        st.meta_total = self.meta_total - released.meta_freed;
        st.overflow_freed = released.data_freed + released.meta_freed;
        st.allocated = true;

        debug!(
            freelist_pages = st.alloc_regions.count_pages(),
            data_regions = st.data_list.len(),
            meta_regions = st.meta_list.len(),
            overflow_freed = st.overflow_freed,
            "alloc.commit.alloc"
        );
        Ok(())
    }

    /// Third commit phase. Encodes the new freelist into its pages and hands
    /// each page to `on_page`.
    pub fn file_commit_serialize<F>(&self, st: &AllocCommitState, on_page: F) -> Result<()>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        if !st.updated || st.alloc_regions.is_empty() {
            return Ok(());
        }
        codec::write_free_lists(
            &st.alloc_regions,
            self.page_size,
            &st.meta_list,
            &st.data_list,
            on_page,
        )
    }

    /// Fourth commit phase. Fills the allocator fields of the meta page to write.
    pub fn file_commit_meta(&self, st: &AllocCommitState, meta: &mut MetaPage) {
        if !st.updated {
            self.write_meta(meta);
            return;
        }
        meta.freelist_root = st.freelist_root();
        meta.data_end_marker = st.data_end_marker;
        meta.meta_end_marker = st.meta_end_marker;
        meta.meta_total = st.meta_total;
    }

    /// Final commit phase, called once the freelist and meta page are durable.
    /// Swaps the computed state into the live allocator.
    pub fn commit(&mut self, tx: &mut TxAllocState, st: AllocCommitState) -> Result<()> {
        tx.ensure_active()?;
        if st.updated && !st.allocated {
            return Err(AllocError::InvalidUse(
                "commit state was not allocated before commit",
            ));
        }
        if st.updated {
            self.freelist_root = st.freelist_root();
            self.freelist_pages = st.alloc_regions;
            self.data.commit(st.data_end_marker, st.data_list);
            self.meta.commit(st.meta_end_marker, st.meta_list);
            self.meta_total = st.meta_total;
        }
        tx.mark_committed();
        debug!(
            updated = st.updated,
            freelist_root = self.freelist_root.0,
            data_end = self.data.end_marker.0,
            meta_end = self.meta.end_marker.0,
            meta_total = self.meta_total,
            "alloc.commit"
        );
        Ok(())
    }
}
