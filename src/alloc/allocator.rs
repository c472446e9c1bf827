use tracing::{debug, trace};

use super::area::AllocArea;
use super::codec::{self, PageSource};
use super::freelist::Freelist;
use super::meta_page::MetaPage;
use super::region::{AllocOrder, Region, RegionList};
use super::tx::{TxAllocOptions, TxAllocState, TxArea};
use super::{DataAllocator, MetaAllocator, MetaManager, WalAllocator};
use crate::config::AllocatorOptions;
use crate::types::{AllocError, PageId, Result};

/// Returned by `avail` when the allocator has no page limit.
pub const NO_LIMIT: u64 = u64::MAX;

/// Page ids 0 and 1 hold the two meta pages and are never allocated.
pub const RESERVED_PAGES: u64 = 2;

/// File-lifetime allocator state shared by every write transaction.
///
/// Callers serialize writers; at most one [`TxAllocState`] may be mutating an
/// `Allocator` at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocator {
    pub(crate) max_pages: u64,
    pub(crate) max_size: u64,
    pub(crate) page_size: u32,
    pub(crate) data: AllocArea,
    pub(crate) meta: AllocArea,
    pub(crate) meta_total: u64,
    pub(crate) freelist_root: PageId,
    pub(crate) freelist_pages: RegionList,
}

/// Allocator level counters derived from the current state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AllocatorStats {
    /// Pages owned by the meta area.
    pub meta_area: u64,
    /// Meta area pages in use.
    pub meta_allocated: u64,
    /// Data area pages in use.
    pub data_allocated: u64,
    /// Free pages in the data area.
    pub data_free: u64,
    /// Free pages in the meta area.
    pub meta_free: u64,
    /// First page id past every claimed page.
    pub file_end: PageId,
}

/// Allocator plus the pages needed to initialize a new file.
#[derive(Debug)]
pub struct Bootstrap {
    /// Allocator state after the initial layout.
    pub allocator: Allocator,
    /// Meta page contents for both meta slots (txid aside).
    pub meta: MetaPage,
    /// `(page id, contents)` of every non-meta page the layout needs.
    pub pages: Vec<(PageId, Vec<u8>)>,
}

impl Allocator {
    /// Creates the state of an empty file without a preallocated meta area.
    pub fn new(options: &AllocatorOptions) -> Result<Self> {
        options.validate()?;
        let max_pages = options.effective_max_pages();
        Ok(Self {
            max_pages,
            max_size: max_pages * options.page_size as u64,
            page_size: options.page_size,
            data: AllocArea::new(PageId(RESERVED_PAGES), Freelist::new()),
            meta: AllocArea::new(PageId::NULL, Freelist::new()),
            meta_total: 0,
            freelist_root: PageId::NULL,
            freelist_pages: RegionList::new(),
        })
    }

    /// Computes the initial layout of a new file.
    ///
    /// With a non-zero `init_meta_area` the pages `[2, 2 + init_meta_area)`
    /// form the meta area; page 2 holds the first freelist, describing the
    /// rest of the area as free meta pages.
    pub fn bootstrap(options: &AllocatorOptions) -> Result<Bootstrap> {
        let mut allocator = Self::new(options)?;
        let meta_total = options.init_meta_area as u64;
        let mut pages = Vec::new();
        if meta_total > 0 {
            let end = PageId(RESERVED_PAGES + meta_total);
            if allocator.max_pages != 0 && end.0 > allocator.max_pages {
                return Err(AllocError::Invalid("initial meta area exceeds max size"));
            }
            let root = PageId(RESERVED_PAGES);
            let free = if meta_total > 1 {
                RegionList::from_unsorted(vec![Region::new(
                    PageId(root.0 + 1),
                    (meta_total - 1) as u32,
                )])
            } else {
                RegionList::new()
            };
            let entries: Vec<(bool, Region)> = free.iter().map(|r| (true, *r)).collect();

            let mut buf = vec![0u8; allocator.page_size as usize];
            codec::encode_free_page(&mut buf, allocator.page_size, root, PageId::NULL, &entries)?;
            pages.push((root, buf));

            allocator.data.end_marker = end;
            allocator.meta.end_marker = end;
            allocator.meta.freelist = Freelist::from_regions(free);
            allocator.meta_total = meta_total;
            allocator.freelist_root = root;
            allocator.freelist_pages = RegionList::from_unsorted(vec![Region::new(root, 1)]);
        }
        let mut meta = MetaPage::new(allocator.page_size, allocator.max_size);
        allocator.write_meta(&mut meta);
        debug!(
            meta_total,
            data_end = allocator.data.end_marker.0,
            "alloc.bootstrap"
        );
        Ok(Bootstrap {
            allocator,
            meta,
            pages,
        })
    }

    /// Rebuilds the allocator from a meta page and the persisted freelist.
    pub fn read_allocator_state<S>(
        options: &AllocatorOptions,
        meta: &MetaPage,
        source: &S,
    ) -> Result<Self>
    where
        S: PageSource + ?Sized,
    {
        if meta.page_size != options.page_size {
            return Err(AllocError::Invalid("page size does not match file"));
        }
        let mut allocator = Self::new(options)?;
        if meta.max_size != 0 && options.max_size == 0 && options.max_pages == 0 {
            allocator.set_max_size(meta.max_size);
        }
        allocator.data.end_marker = meta.data_end_marker;
        allocator.meta.end_marker = meta.meta_end_marker;
        allocator.meta_total = meta.meta_total;
        allocator.freelist_root = meta.freelist_root;
        if meta.data_end_marker.0 < RESERVED_PAGES {
            return Err(AllocError::Corruption("data end marker below reserved pages"));
        }
        if meta.freelist_root.is_null() {
            return Ok(allocator);
        }

        let mut meta_regions = Vec::new();
        let mut data_regions = Vec::new();
        let mut reader = codec::read_free_list(source, meta.freelist_root, allocator.page_size);
        for entry in &mut reader {
            let (is_meta, region) = entry?;
            if is_meta {
                meta_regions.push(region);
            } else {
                data_regions.push(region);
            }
        }
        let freelist_pages = reader.pages().regions();

        allocator.meta.freelist = Freelist::from_regions(RegionList::from_unsorted(meta_regions));
        allocator.data.freelist = Freelist::from_regions(RegionList::from_unsorted(data_regions));
        allocator.freelist_pages = freelist_pages;
        if allocator.meta_total < allocator.meta.freelist.avail() {
            return Err(AllocError::Corruption("meta total below free meta pages"));
        }
        trace!(
            data_free = allocator.data.freelist.avail(),
            meta_free = allocator.meta.freelist.avail(),
            "alloc.read_state"
        );
        Ok(allocator)
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Page limit of the file; zero means unlimited.
    pub fn max_pages(&self) -> u64 {
        self.max_pages
    }

    /// Maximum file size in bytes, 0 for unlimited.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// The data area.
    pub fn data_area(&self) -> &AllocArea {
        &self.data
    }

    /// The meta area.
    pub fn meta_area(&self) -> &AllocArea {
        &self.meta
    }

    /// Pages owned by the meta area, free or not.
    pub fn meta_total(&self) -> u64 {
        self.meta_total
    }

    /// First page of the persisted freelist, `PageId::NULL` if none.
    pub fn freelist_root(&self) -> PageId {
        self.freelist_root
    }

    /// Pages holding the persisted freelist.
    pub fn freelist_pages(&self) -> &RegionList {
        &self.freelist_pages
    }

    /// First page id past both areas. The file must be at least this many pages long.
    pub fn file_end(&self) -> PageId {
        self.data.end_marker.max(self.meta.end_marker)
    }

    /// Allocator for ordinary content pages.
    pub fn data_allocator(&mut self) -> DataAllocator<'_> {
        DataAllocator::new(self)
    }

    /// Allocator for write-ahead log pages.
    pub fn wal_allocator(&mut self) -> WalAllocator<'_> {
        WalAllocator::new(self)
    }

    /// Allocator for the pages of the persisted freelist.
    pub fn meta_allocator(&mut self) -> MetaAllocator<'_> {
        MetaAllocator::new(self)
    }

    /// Direct access to meta area rebalancing.
    pub fn meta_manager(&mut self) -> MetaManager<'_> {
        MetaManager::new(self)
    }

    /// Opens the allocation state of a new write transaction.
    pub fn make_tx_alloc_state(
        &self,
        overflow_area_enabled: bool,
        meta_grow_percentage: u32,
    ) -> TxAllocState {
        self.begin(TxAllocOptions {
            overflow_area_enabled,
            meta_grow_percentage,
        })
    }

    /// Starts a write transaction with explicit options.
    pub fn begin(&self, options: TxAllocOptions) -> TxAllocState {
        TxAllocState::new(
            self.data.end_marker,
            self.meta.end_marker,
            self.meta_total,
            options,
        )
    }

    /// Undoes every change `tx` made, restoring the state it started from.
    pub fn rollback(&mut self, tx: &mut TxAllocState) -> Result<()> {
        tx.ensure_active()?;

        self.meta.rollback(&mut tx.meta);
        for region in tx.manager.revert() {
            self.meta.freelist.remove_region(region);
            if region.id < tx.data.end_marker {
                tx.data.allocated.add_region(region);
            }
        }
        self.data.rollback(&mut tx.data);
        self.meta_total = tx.meta_total;
        tx.mark_rolled_back();

        debug!(
            data_end = self.data.end_marker.0,
            meta_end = self.meta.end_marker.0,
            meta_total = self.meta_total,
            "alloc.rollback"
        );
        Ok(())
    }

    /// Page counts for both areas.
    pub fn stats(&self) -> AllocatorStats {
        let file_end = self.file_end();
        let meta_free = self.meta.freelist.avail();
        let data_free = self.data.freelist.avail();
        AllocatorStats {
            meta_area: self.meta_total,
            meta_allocated: self.meta_total.saturating_sub(meta_free),
            data_allocated: file_end
                .0
                .saturating_sub(RESERVED_PAGES + self.meta_total + data_free),
            data_free,
            meta_free,
            file_end,
        }
    }

    /// Changes the file size limit, rounded down to whole pages. Zero removes the limit.
    pub fn set_max_size(&mut self, max_size: u64) {
        self.max_pages = max_size / self.page_size as u64;
        self.max_size = self.max_pages * self.page_size as u64;
        debug!(
            max_size = self.max_size,
            max_pages = self.max_pages,
            "alloc.set_max_size"
        );
    }

    /// True if the tail of either area is free and lies past `max_pages`, so a
    /// forced commit would hand pages back to the file system.
    pub fn can_release_regions(&self) -> bool {
        let releasable = |area: &AllocArea| {
            area.freelist
                .last_region()
                .is_some_and(|last| last.end() == area.end_marker)
                && area.end_marker.0 > self.max_pages
        };
        self.max_pages != 0 && (releasable(&self.data) || releasable(&self.meta))
    }

    /// Writes the live allocator fields into `meta`.
    pub(crate) fn write_meta(&self, meta: &mut MetaPage) {
        meta.freelist_root = self.freelist_root;
        meta.data_end_marker = self.data.end_marker;
        meta.meta_end_marker = self.meta.end_marker;
        meta.meta_total = self.meta_total;
    }

    /// Pages the data area can still hand out without overflowing.
    pub(crate) fn data_avail(&self) -> u64 {
        if self.max_pages == 0 {
            return NO_LIMIT;
        }
        self.max_pages.saturating_sub(self.file_end().0) + self.data.freelist.avail()
    }

    pub(crate) fn meta_avail(&self, tx: &TxAllocState) -> u64 {
        let data_avail = self.data_avail();
        if data_avail == NO_LIMIT || tx.options.overflow_area_enabled {
            return NO_LIMIT;
        }
        self.meta.freelist.avail() + data_avail
    }

    /// Claims `count` pages past `marker`, one chunk of at most `u32::MAX` pages at a time.
    pub(crate) fn alloc_from_area<F>(area: &mut TxArea, marker: &mut PageId, count: u64, mut f: F)
    where
        F: FnMut(Region),
    {
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(u32::MAX as u64) as u32;
            let region = Region::new(*marker, n);
            area.new.add_region(region);
            *marker = region.end();
            remaining -= n as u64;
            f(region);
        }
    }
}

/// Takes up to `max` pages from `freelist`, recording them as allocated.
pub(crate) fn alloc_from_freelist<F>(
    freelist: &mut Freelist,
    area: &mut TxArea,
    order: AllocOrder,
    max: u64,
    mut f: F,
) -> u64
where
    F: FnMut(Region),
{
    let count = max.min(freelist.avail());
    freelist.alloc_regions_with(order, count, |region| {
        area.allocated.add_region(region);
        f(region);
    })
}

/// Takes one contiguous run of `n` pages from `freelist`, recording it as allocated.
pub(crate) fn alloc_cont_from_freelist(
    freelist: &mut Freelist,
    area: &mut TxArea,
    order: AllocOrder,
    n: u64,
) -> Option<Region> {
    let region = freelist.alloc_continuous_region(order, n)?;
    area.allocated.add_region(region);
    Some(region)
}
