//! Identifiers, errors and on-disk page header shared by the allocator.

use std::fmt;

/// Page checksums.
pub mod checksum;

pub use checksum::page_crc32;

/// Index of a page inside the backing file. `PageId(0)` is the "no page" sentinel.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

impl PageId {
    /// The reserved "no page" id.
    pub const NULL: PageId = PageId(0);

    /// Returns true for the sentinel id.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

/// Errors raised by the allocator and its file collaborators.
#[derive(thiserror::Error, Debug)]
pub enum AllocError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// No allocation path, including the overflow area, can satisfy the request.
    #[error("out of memory: requested {requested} page(s), {avail} available")]
    OutOfMemory {
        /// Number of pages requested.
        requested: u64,
        /// Number of pages the allocator could still provide.
        avail: u64,
    },
    /// A page outside `[2, end_marker)` was freed.
    #[error("invalid free of page {id} (end marker {end_marker})")]
    InvalidFree {
        /// Offending page id.
        id: PageId,
        /// Data area end marker at the time of the free.
        end_marker: PageId,
    },
    /// The page write callback failed while serializing the freelist.
    #[error("failed to serialize freelist page {page}: {source}")]
    Serialization {
        /// Page that could not be written.
        page: PageId,
        /// Error reported by the callback.
        #[source]
        source: Box<AllocError>,
    },
    /// Transaction state used after it was committed or rolled back.
    #[error("invalid use: {0}")]
    InvalidUse(&'static str),
    /// Persisted allocator state failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Invalid argument or configuration.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AllocError>;

pub mod page {
    //! Common header carried by every page the allocator writes itself.

    use super::{AllocError, PageId, Result};

    /// Magic bytes opening every allocator page.
    pub const PAGE_MAGIC: [u8; 4] = *b"TXAL";
    /// Current page format version.
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    /// Page size used when none is configured.
    pub const DEFAULT_PAGE_SIZE: u32 = 4096;
    /// Length of the common page header.
    pub const PAGE_HDR_LEN: usize = 32;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        /// Magic bytes.
        pub const MAGIC: Range<usize> = 0..4;
        /// Format version, big endian.
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        /// Page kind tag.
        pub const PAGE_KIND: usize = 6;
        /// Unused, zero.
        pub const RESERVED: usize = 7;
        /// Page size, big endian.
        pub const PAGE_SIZE: Range<usize> = 8..12;
        /// Page number, big endian.
        pub const PAGE_NO: Range<usize> = 12..20;
        /// Unused, zero.
        pub const RESERVED_2: Range<usize> = 20..28;
        /// Checksum over the page number and the page bytes.
        pub const CRC32: Range<usize> = 28..32;
    }

    /// Kind tag stored in the page header.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        /// File meta page (ids 0 and 1).
        Meta = 1,
        /// Serialized freelist page.
        FreeList = 2,
    }

    impl PageKind {
        /// Raw tag value.
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = AllocError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::Meta),
                2 => Ok(PageKind::FreeList),
                _ => Err(AllocError::Corruption("unknown page kind")),
            }
        }
    }

    /// Decoded page header.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        /// Format version the page was written with.
        pub format_version: u16,
        /// Kind of page.
        pub kind: PageKind,
        /// Page size in bytes.
        pub page_size: u32,
        /// Id of the page holding the header.
        pub page_no: PageId,
        /// Stored checksum.
        pub crc32: u32,
    }

    impl PageHeader {
        /// Header for a new page with a zero checksum.
        pub fn new(page_no: PageId, kind: PageKind, page_size: u32) -> Result<Self> {
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(AllocError::Invalid("page size smaller than header"));
            }
            Ok(Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_size,
                page_no,
                crc32: 0,
            })
        }

        /// Replaces the checksum.
        pub fn with_crc32(mut self, crc32: u32) -> Self {
            self.crc32 = crc32;
            self
        }

        /// Writes the header into the first bytes of `dst`.
        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(AllocError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::RESERVED_2].fill(0);
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        /// Parses a header, checking magic and version.
        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(AllocError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            if hdr[header::MAGIC] != PAGE_MAGIC {
                return Err(AllocError::Corruption("bad page magic"));
            }
            let format_version = u16::from_be_bytes(hdr[header::FORMAT_VERSION].try_into().unwrap());
            if format_version != PAGE_FORMAT_VERSION {
                return Err(AllocError::Corruption("unsupported page format version"));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            if hdr[header::RESERVED] != 0 || hdr[header::RESERVED_2].iter().any(|b| *b != 0) {
                return Err(AllocError::Corruption("page header reserved non-zero"));
            }
            let page_size = u32::from_be_bytes(hdr[header::PAGE_SIZE].try_into().unwrap());
            let page_no = PageId(u64::from_be_bytes(hdr[header::PAGE_NO].try_into().unwrap()));
            let crc32 = u32::from_be_bytes(hdr[header::CRC32].try_into().unwrap());
            Ok(Self {
                format_version,
                kind,
                page_size,
                page_no,
                crc32,
            })
        }
    }

    /// Zeroes the crc field so the checksum can be computed over the page.
    pub fn clear_crc32(hdr: &mut [u8]) -> Result<()> {
        if hdr.len() < PAGE_HDR_LEN {
            return Err(AllocError::Invalid("page header buffer too small"));
        }
        hdr[header::CRC32].fill(0);
        Ok(())
    }

    /// Writes the header, then seals the page with its crc32.
    pub fn seal(buf: &mut [u8], page_no: PageId, kind: PageKind, page_size: u32) -> Result<()> {
        let len = page_size as usize;
        if buf.len() < len {
            return Err(AllocError::Invalid("page buffer too small"));
        }
        PageHeader::new(page_no, kind, page_size)?
            .with_crc32(0)
            .encode(&mut buf[..PAGE_HDR_LEN])?;
        let crc = super::page_crc32(page_no.0, &buf[..len]);
        buf[header::CRC32].copy_from_slice(&crc.to_be_bytes());
        Ok(())
    }

    /// Validates the header of `buf` against the expected id, kind and size.
    pub fn verify(buf: &[u8], page_no: PageId, kind: PageKind, page_size: u32) -> Result<()> {
        let header = PageHeader::decode(buf)?;
        if header.kind != kind {
            return Err(AllocError::Corruption("page kind mismatch"));
        }
        if header.page_size != page_size {
            return Err(AllocError::Corruption("page size mismatch"));
        }
        if header.page_no != page_no {
            return Err(AllocError::Corruption("page number mismatch"));
        }
        let len = page_size as usize;
        if buf.len() < len {
            return Err(AllocError::Corruption("page truncated"));
        }
        let mut scratch = buf[..len].to_vec();
        clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
        if super::page_crc32(page_no.0, &scratch) != header.crc32 {
            return Err(AllocError::Corruption("page crc mismatch"));
        }
        Ok(())
    }

}
