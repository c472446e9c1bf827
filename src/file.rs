//! Minimal page file driving the allocator against real storage.
//!
//! Page 0 and 1 hold alternating meta pages; the one with the highest txid
//! that passes validation is current. Commits write the new freelist, sync,
//! write the next meta slot, sync, and only then update the in-memory
//! allocator.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::alloc::meta_page::{read_meta_page, write_meta_page};
use crate::alloc::{Allocator, AllocatorStats, MetaPage, PageSource, TxAllocState};
use crate::config::AllocatorOptions;
use crate::io::{FileIo, StdFileIo};
use crate::types::{AllocError, PageId, Result};

struct IoSource<'a, I: FileIo> {
    io: &'a I,
    page_size: u32,
}

impl<I: FileIo> PageSource for IoSource<'_, I> {
    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        self.io.read_page(id, self.page_size, buf)
    }
}

/// A file of fixed-size pages whose free space is managed by an [`Allocator`].
pub struct PageFile<I: FileIo = StdFileIo> {
    io: I,
    options: AllocatorOptions,
    allocator: Allocator,
    meta: MetaPage,
    /// File end recorded by the previous meta slot; pages below it may still
    /// be referenced if the current slot is lost.
    prev_end: PageId,
}

impl PageFile<StdFileIo> {
    /// Opens `path`, creating and initializing it when empty.
    pub fn open_path(path: impl AsRef<Path>, options: AllocatorOptions) -> Result<Self> {
        let io = StdFileIo::open(path)?;
        if io.is_empty()? {
            Self::create(io, options)
        } else {
            Self::open(io, options)
        }
    }
}

impl<I: FileIo> PageFile<I> {
    /// Initializes an empty file.
    pub fn create(io: I, options: AllocatorOptions) -> Result<Self> {
        if !io.is_empty()? {
            return Err(AllocError::Invalid("file already initialized"));
        }
        let boot = Allocator::bootstrap(&options)?;
        let page_size = options.page_size;
        for (id, page) in &boot.pages {
            io.write_page(*id, page_size, page)?;
        }

        let mut buf = vec![0u8; page_size as usize];
        let mut meta = boot.meta.clone();
        for txid in 0..2 {
            meta.txid = txid;
            write_meta_page(&mut buf, &meta)?;
            io.write_page(meta.slot(), page_size, &buf)?;
        }
        io.sync_all()?;
        info!(
            page_size,
            meta_total = boot.allocator.meta_total(),
            "file.create"
        );

        let prev_end = boot.allocator.file_end();
        Ok(Self {
            io,
            options,
            allocator: boot.allocator,
            meta,
            prev_end,
        })
    }

    /// Opens an initialized file, picking the newest valid meta page.
    pub fn open(io: I, options: AllocatorOptions) -> Result<Self> {
        let page_size = options.page_size;
        let mut buf = vec![0u8; page_size as usize];
        let mut metas = Vec::with_capacity(2);
        for slot in 0..2 {
            let slot = PageId(slot);
            let read = io
                .read_page(slot, page_size, &mut buf)
                .and_then(|_| read_meta_page(&buf, slot));
            match read {
                Ok(meta) => metas.push(meta),
                Err(err) => warn!(slot = slot.0, error = %err, "file.open.invalid_meta"),
            }
        }
        metas.sort_by_key(|m| m.txid);
        let meta = metas
            .pop()
            .ok_or(AllocError::Corruption("no valid meta page"))?;
        let prev_end = metas
            .pop()
            .map(|m| m.data_end_marker.max(m.meta_end_marker))
            .unwrap_or(PageId::NULL);

        let source = IoSource {
            io: &io,
            page_size,
        };
        let allocator = Allocator::read_allocator_state(&options, &meta, &source)?;
        debug!(
            txid = meta.txid,
            file_end = allocator.file_end().0,
            "file.open"
        );
        Ok(Self {
            io,
            options,
            allocator,
            meta,
            prev_end,
        })
    }

    /// The underlying I/O handle.
    pub fn io(&self) -> &I {
        &self.io
    }

    /// Options the file was opened with.
    pub fn options(&self) -> &AllocatorOptions {
        &self.options
    }

    /// The committed allocator state.
    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Access to the allocator facades for the running write transaction.
    pub fn allocator_mut(&mut self) -> &mut Allocator {
        &mut self.allocator
    }

    /// Most recently committed meta page.
    pub fn meta(&self) -> &MetaPage {
        &self.meta
    }

    /// Current page counts.
    pub fn stats(&self) -> AllocatorStats {
        self.allocator.stats()
    }

    /// Starts a write transaction using the configured defaults.
    pub fn begin(&self) -> TxAllocState {
        self.allocator.begin(self.options.tx_options())
    }

    /// Reads page `id` into `buf`.
    pub fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        self.io.read_page(id, self.options.page_size, buf)
    }

    /// Writes a page the caller allocated.
    pub fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        if id.0 < 2 || id >= self.allocator.file_end() {
            return Err(AllocError::Invalid("page outside of allocated range"));
        }
        self.io.write_page(id, self.options.page_size, buf)
    }

    /// Commits `tx`. On failure the transaction is rolled back and the error returned.
    pub fn commit(&mut self, tx: &mut TxAllocState) -> Result<()> {
        self.commit_with(tx, false)
    }

    fn commit_with(&mut self, tx: &mut TxAllocState, force: bool) -> Result<()> {
        match self.write_commit(tx, force) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "file.commit.failed");
                if tx.is_active() {
                    self.rollback(tx)?;
                }
                Err(err)
            }
        }
    }

    fn write_commit(&mut self, tx: &mut TxAllocState, force: bool) -> Result<()> {
        let page_size = self.options.page_size;
        let mut st = self.allocator.file_commit_prepare(tx, force)?;
        self.allocator.file_commit_alloc(tx, &mut st)?;
        let io = &self.io;
        self.allocator
            .file_commit_serialize(&st, |id, page| io.write_page(id, page_size, page))?;
        io.sync_all()?;

        let mut meta = self.meta.clone();
        meta.txid += 1;
        meta.max_size = self.allocator.max_size();
        self.allocator.file_commit_meta(&st, &mut meta);
        let mut buf = vec![0u8; page_size as usize];
        write_meta_page(&mut buf, &meta)?;
        io.write_page(meta.slot(), page_size, &buf)?;
        io.sync_all()?;

        self.allocator.commit(tx, st)?;
        let old_end = self.meta.data_end_marker.max(self.meta.meta_end_marker);
        self.meta = meta;
        let keep = self.allocator.file_end().max(old_end);
        self.prev_end = old_end;
        self.truncate_to(keep)?;
        debug!(txid = self.meta.txid, file_end = keep.0, "file.commit");
        Ok(())
    }

    /// Discards `tx`, restoring the allocator and dropping pages the
    /// transaction appended to the file.
    pub fn rollback(&mut self, tx: &mut TxAllocState) -> Result<()> {
        self.allocator.rollback(tx)?;
        let keep = self.allocator.file_end().max(self.prev_end);
        self.truncate_to(keep)
    }

    fn truncate_to(&self, end: PageId) -> Result<()> {
        let len = end.0 * self.options.page_size as u64;
        if self.io.len()? > len {
            debug!(pages = end.0, "file.truncate");
            self.io.truncate(len)?;
        }
        Ok(())
    }

    /// Changes the maximum file size and commits it. Pages past a smaller
    /// limit are handed back when the tail of the file is free.
    pub fn set_max_size(&mut self, max_size: u64) -> Result<()> {
        self.allocator.set_max_size(max_size);
        self.options.max_size = self.allocator.max_size();
        self.options.max_pages = 0;
        let mut tx = self.begin();
        self.commit_with(&mut tx, true)
    }

    /// Runs a forced commit that releases free pages past the size limit.
    /// Returns false when there was nothing to release.
    pub fn release_regions(&mut self) -> Result<bool> {
        if !self.allocator.can_release_regions() {
            return Ok(false);
        }
        let mut tx = self.allocator.begin(Default::default());
        self.commit_with(&mut tx, true)?;
        Ok(true)
    }
}

impl<I: FileIo> PageSource for PageFile<I> {
    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        PageFile::read_page(self, id, buf)
    }
}
