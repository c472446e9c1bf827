//! On-disk encoding of the freelist.
//!
//! The freelist is a chain of pages. Each page carries the common page header
//! followed by:
//!
//! ```text
//! next  u64   next page of the chain, 0 on the last page
//! count u32   number of entries on this page
//! rsvd  u32
//! count x { id u64 (bit 63 set for meta regions), pages u32, rsvd u32 }
//! ```
//!
//! Meta area regions are written before data area regions.

use super::page_set::PageSet;
use super::region::{Region, RegionList};
use crate::types::page::{self, PageKind, PAGE_HDR_LEN};
use crate::types::{AllocError, PageId, Result};

const FREE_HDR_LEN: usize = 16;
const ENTRY_LEN: usize = 16;
const META_FLAG: u64 = 1 << 63;

/// Number of region entries one free page of `page_size` bytes holds.
pub fn free_page_capacity(page_size: u32) -> usize {
    (page_size as usize).saturating_sub(PAGE_HDR_LEN + FREE_HDR_LEN) / ENTRY_LEN
}

/// Page count estimate for a freelist that is still being assembled.
#[derive(Clone, Copy, Debug)]
pub struct FreelistPrediction {
    per_page: u64,
    entries: u64,
}

impl FreelistPrediction {
    /// Empty prediction for pages of `page_size` bytes.
    pub fn new(page_size: u32) -> Self {
        Self {
            per_page: free_page_capacity(page_size) as u64,
            entries: 0,
        }
    }

    /// Counts one more freelist entry.
    pub fn add_region(&mut self, _region: Region) {
        self.entries += 1;
    }

    /// Counts one entry per region in `regions`.
    pub fn add_regions(&mut self, regions: &RegionList) {
        self.entries += regions.len() as u64;
    }

    /// Reserves room for entries that do not exist yet.
    pub fn reserve_entries(&mut self, n: u64) {
        self.entries += n;
    }

    /// Entries counted so far.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Pages needed to hold every entry counted so far.
    pub fn pages(&self) -> u64 {
        if self.per_page == 0 {
            return 0;
        }
        self.entries.div_ceil(self.per_page)
    }
}

/// Contents of one decoded free page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreePage {
    /// Next page in the chain, 0 on the last page.
    pub next: PageId,
    /// `(is_meta, region)` pairs in page order.
    pub entries: Vec<(bool, Region)>,
}

/// Encodes one free page and seals it with its checksum.
pub fn encode_free_page(
    buf: &mut [u8],
    page_size: u32,
    page_id: PageId,
    next: PageId,
    entries: &[(bool, Region)],
) -> Result<()> {
    let len = page_size as usize;
    if buf.len() < len {
        return Err(AllocError::Invalid("free page buffer too small"));
    }
    if entries.len() > free_page_capacity(page_size) {
        return Err(AllocError::Invalid("too many entries for free page"));
    }
    buf[..len].fill(0);
    let payload = &mut buf[PAGE_HDR_LEN..len];
    payload[0..8].copy_from_slice(&next.0.to_be_bytes());
    payload[8..12].copy_from_slice(&(entries.len() as u32).to_be_bytes());
    for (idx, (is_meta, region)) in entries.iter().enumerate() {
        if region.id.0 & META_FLAG != 0 {
            return Err(AllocError::Invalid("page id too large for freelist entry"));
        }
        let off = FREE_HDR_LEN + idx * ENTRY_LEN;
        let id = if *is_meta {
            region.id.0 | META_FLAG
        } else {
            region.id.0
        };
        payload[off..off + 8].copy_from_slice(&id.to_be_bytes());
        payload[off + 8..off + 12].copy_from_slice(&region.count.to_be_bytes());
    }
    page::seal(buf, page_id, PageKind::FreeList, page_size)
}

/// Decodes and validates the free page `page_id`.
pub fn decode_free_page(buf: &[u8], page_size: u32, page_id: PageId) -> Result<FreePage> {
    page::verify(buf, page_id, PageKind::FreeList, page_size)?;
    let payload = &buf[PAGE_HDR_LEN..page_size as usize];
    let next = PageId(u64::from_be_bytes(payload[0..8].try_into().unwrap()));
    let count = u32::from_be_bytes(payload[8..12].try_into().unwrap()) as usize;
    if payload[12..16] != [0; 4] {
        return Err(AllocError::Corruption("free page reserved non-zero"));
    }
    if count > free_page_capacity(page_size) {
        return Err(AllocError::Corruption("free page count exceeds capacity"));
    }
    let mut entries = Vec::with_capacity(count);
    for idx in 0..count {
        let off = FREE_HDR_LEN + idx * ENTRY_LEN;
        let raw = u64::from_be_bytes(payload[off..off + 8].try_into().unwrap());
        let pages = u32::from_be_bytes(payload[off + 8..off + 12].try_into().unwrap());
        let id = PageId(raw & !META_FLAG);
        if id.0 < 2 || pages == 0 {
            return Err(AllocError::Corruption("invalid freelist entry"));
        }
        entries.push((raw & META_FLAG != 0, Region::new(id, pages)));
    }
    Ok(FreePage { next, entries })
}

/// Writes `meta_list` and `data_list` into the pages of `pages`, chained in
/// ascending id order, handing each encoded page to `on_page`.
pub fn write_free_lists<F>(
    pages: &RegionList,
    page_size: u32,
    meta_list: &RegionList,
    data_list: &RegionList,
    mut on_page: F,
) -> Result<()>
where
    F: FnMut(PageId, &[u8]) -> Result<()>,
{
    let ids: Vec<PageId> = pages.pages().collect();
    let per_page = free_page_capacity(page_size);
    let entries: Vec<(bool, Region)> = meta_list
        .iter()
        .map(|r| (true, *r))
        .chain(data_list.iter().map(|r| (false, *r)))
        .collect();
    if per_page == 0 || entries.len() > per_page * ids.len() {
        return Err(AllocError::Invalid("freelist does not fit into allocated pages"));
    }

    let mut buf = vec![0u8; page_size as usize];
    let mut chunks = entries.chunks(per_page);
    for (idx, id) in ids.iter().enumerate() {
        let next = ids.get(idx + 1).copied().unwrap_or(PageId::NULL);
        let chunk = chunks.next().unwrap_or(&[]);
        encode_free_page(&mut buf, page_size, *id, next, chunk)?;
        on_page(*id, &buf).map_err(|err| AllocError::Serialization {
            page: *id,
            source: Box::new(err),
        })?;
    }
    Ok(())
}

/// Read access to persisted pages.
pub trait PageSource {
    /// Fills `buf` with the contents of page `id`.
    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()>;
}

impl<F> PageSource for F
where
    F: Fn(PageId, &mut [u8]) -> Result<()>,
{
    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        self(id, buf)
    }
}

/// Iterates the `(is_meta, region)` entries of a persisted freelist.
pub struct FreelistReader<'a, S: ?Sized> {
    source: &'a S,
    page_size: u32,
    next: PageId,
    buf: Vec<u8>,
    current: std::vec::IntoIter<(bool, Region)>,
    pages: PageSet,
    failed: bool,
}

/// Starts reading the freelist chain rooted at `root`.
pub fn read_free_list<S>(source: &S, root: PageId, page_size: u32) -> FreelistReader<'_, S>
where
    S: PageSource + ?Sized,
{
    FreelistReader {
        source,
        page_size,
        next: root,
        buf: vec![0u8; page_size as usize],
        current: Vec::new().into_iter(),
        pages: PageSet::new(),
        failed: false,
    }
}

impl<S: PageSource + ?Sized> FreelistReader<'_, S> {
    /// Pages of the chain visited so far.
    pub fn pages(&self) -> &PageSet {
        &self.pages
    }

    fn load_next(&mut self) -> Result<()> {
        let id = self.next;
        if id.0 < 2 {
            return Err(AllocError::Corruption("freelist chain points at reserved page"));
        }
        if !self.pages.add(id) {
            return Err(AllocError::Corruption("freelist chain contains a cycle"));
        }
        self.source.read_page(id, &mut self.buf)?;
        let page = decode_free_page(&self.buf, self.page_size, id)?;
        self.next = page.next;
        self.current = page.entries.into_iter();
        Ok(())
    }
}

impl<S: PageSource + ?Sized> Iterator for FreelistReader<'_, S> {
    type Item = Result<(bool, Region)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(entry) = self.current.next() {
                return Some(Ok(entry));
            }
            if self.next.is_null() {
                return None;
            }
            if let Err(err) = self.load_next() {
                self.failed = true;
                return Some(Err(err));
            }
        }
    }
}
