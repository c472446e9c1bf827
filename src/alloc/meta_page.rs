use std::ops::Range;

use crate::types::page::{self, PageHeader, PageKind, PAGE_FORMAT_VERSION, PAGE_HDR_LEN};
use crate::types::{AllocError, PageId, Result};

const META_TXID: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
const META_PAGE_SIZE: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 12;
const META_FORMAT_VERSION: Range<usize> = PAGE_HDR_LEN + 12..PAGE_HDR_LEN + 14;
const META_RESERVED: Range<usize> = PAGE_HDR_LEN + 14..PAGE_HDR_LEN + 16;
const META_MAX_SIZE: Range<usize> = PAGE_HDR_LEN + 16..PAGE_HDR_LEN + 24;
const META_FREELIST_ROOT: Range<usize> = PAGE_HDR_LEN + 24..PAGE_HDR_LEN + 32;
const META_DATA_END_MARKER: Range<usize> = PAGE_HDR_LEN + 32..PAGE_HDR_LEN + 40;
const META_META_END_MARKER: Range<usize> = PAGE_HDR_LEN + 40..PAGE_HDR_LEN + 48;
const META_META_TOTAL: Range<usize> = PAGE_HDR_LEN + 48..PAGE_HDR_LEN + 56;

/// Smallest page able to hold a meta page.
pub const META_PAGE_LEN: usize = PAGE_HDR_LEN + 56;

/// File meta page, stored alternately in page 0 and page 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaPage {
    /// Id of the transaction that wrote the page.
    pub txid: u64,
    /// Page size the file was created with.
    pub page_size: u32,
    /// Maximum file size in bytes, 0 for unlimited.
    pub max_size: u64,
    /// First page of the persisted freelist, 0 if none.
    pub freelist_root: PageId,
    /// Data area end marker.
    pub data_end_marker: PageId,
    /// Meta area end marker.
    pub meta_end_marker: PageId,
    /// Pages owned by the meta area.
    pub meta_total: u64,
}

impl MetaPage {
    /// Meta page for an empty file with no transaction written yet.
    pub fn new(page_size: u32, max_size: u64) -> Self {
        Self {
            txid: 0,
            page_size,
            max_size,
            freelist_root: PageId::NULL,
            data_end_marker: PageId(2),
            meta_end_marker: PageId::NULL,
            meta_total: 0,
        }
    }

    /// Meta slot (page 0 or 1) this page is written to.
    pub fn slot(&self) -> PageId {
        PageId(self.txid % 2)
    }
}

/// Encodes `meta` into `buf` for its slot and seals it.
pub fn write_meta_page(buf: &mut [u8], meta: &MetaPage) -> Result<()> {
    let page_size = meta.page_size as usize;
    if page_size < META_PAGE_LEN || buf.len() < page_size {
        return Err(AllocError::Invalid("meta buffer too small"));
    }
    buf[..page_size].fill(0);
    buf[META_TXID].copy_from_slice(&meta.txid.to_be_bytes());
    buf[META_PAGE_SIZE].copy_from_slice(&meta.page_size.to_be_bytes());
    buf[META_FORMAT_VERSION].copy_from_slice(&PAGE_FORMAT_VERSION.to_be_bytes());
    buf[META_RESERVED].fill(0);
    buf[META_MAX_SIZE].copy_from_slice(&meta.max_size.to_be_bytes());
    buf[META_FREELIST_ROOT].copy_from_slice(&meta.freelist_root.0.to_be_bytes());
    buf[META_DATA_END_MARKER].copy_from_slice(&meta.data_end_marker.0.to_be_bytes());
    buf[META_META_END_MARKER].copy_from_slice(&meta.meta_end_marker.0.to_be_bytes());
    buf[META_META_TOTAL].copy_from_slice(&meta.meta_total.to_be_bytes());
    page::seal(buf, meta.slot(), PageKind::Meta, meta.page_size)
}

/// Decodes the meta page stored in `slot` and verifies its checksum.
pub fn read_meta_page(buf: &[u8], slot: PageId) -> Result<MetaPage> {
    let header = PageHeader::decode(buf)?;
    if header.kind != PageKind::Meta {
        return Err(AllocError::Corruption("meta page has wrong kind"));
    }
    if (header.page_size as usize) < META_PAGE_LEN {
        return Err(AllocError::Corruption("meta page size too small"));
    }
    page::verify(buf, slot, PageKind::Meta, header.page_size)?;

    let txid = u64::from_be_bytes(buf[META_TXID].try_into().unwrap());
    let page_size = u32::from_be_bytes(buf[META_PAGE_SIZE].try_into().unwrap());
    if page_size != header.page_size {
        return Err(AllocError::Corruption("meta page size mismatch"));
    }
    let format_version = u16::from_be_bytes(buf[META_FORMAT_VERSION].try_into().unwrap());
    if format_version != PAGE_FORMAT_VERSION {
        return Err(AllocError::Corruption("unsupported meta format version"));
    }
    if buf[META_RESERVED].iter().any(|b| *b != 0) {
        return Err(AllocError::Corruption("meta reserved field non-zero"));
    }
    let meta = MetaPage {
        txid,
        page_size,
        max_size: u64::from_be_bytes(buf[META_MAX_SIZE].try_into().unwrap()),
        freelist_root: PageId(u64::from_be_bytes(
            buf[META_FREELIST_ROOT].try_into().unwrap(),
        )),
        data_end_marker: PageId(u64::from_be_bytes(
            buf[META_DATA_END_MARKER].try_into().unwrap(),
        )),
        meta_end_marker: PageId(u64::from_be_bytes(
            buf[META_META_END_MARKER].try_into().unwrap(),
        )),
        meta_total: u64::from_be_bytes(buf[META_META_TOTAL].try_into().unwrap()),
    };
    if meta.slot() != slot {
        return Err(AllocError::Corruption("meta txid does not match slot"));
    }
    Ok(meta)
}
