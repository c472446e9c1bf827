#![allow(missing_docs)]

use std::io;

use txalloc::{AllocError, Allocator, AllocatorOptions, MetaPage, PageId, Result};

fn allocator(max_pages: u64) -> Allocator {
    Allocator::new(&AllocatorOptions {
        max_pages,
        page_size: 512,
        ..AllocatorOptions::default()
    })
    .unwrap()
}

fn commit_all(alloc: &mut Allocator, tx: &mut txalloc::TxAllocState, force: bool) -> Result<()> {
    let mut st = alloc.file_commit_prepare(tx, force)?;
    alloc.file_commit_alloc(tx, &mut st)?;
    alloc.file_commit_serialize(&st, |_, _| Ok(()))?;
    alloc.commit(tx, st)
}

#[test]
fn finished_state_rejects_further_use() -> Result<()> {
    let mut alloc = allocator(0);
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 4, |_| {})?;
    commit_all(&mut alloc, &mut tx, false)?;
    assert!(!tx.is_active());

    assert!(matches!(alloc.rollback(&mut tx), Err(AllocError::InvalidUse(_))));
    assert!(matches!(
        alloc.data_allocator().alloc_regions_with(&mut tx, 1, |_| {}),
        Err(AllocError::InvalidUse(_))
    ));

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.rollback(&mut tx)?;
    assert!(matches!(
        alloc.file_commit_prepare(&mut tx, false),
        Err(AllocError::InvalidUse(_))
    ));
    assert!(matches!(alloc.rollback(&mut tx), Err(AllocError::InvalidUse(_))));
    Ok(())
}

#[test]
fn commit_without_alloc_phase_is_rejected() -> Result<()> {
    let mut alloc = allocator(0);
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 1, |_| {})?;
    let st = alloc.file_commit_prepare(&mut tx, false)?;
    assert!(matches!(
        alloc.commit(&mut tx, st),
        Err(AllocError::InvalidUse(_))
    ));
    assert!(tx.is_active());
    alloc.rollback(&mut tx)
}

#[test]
fn unchanged_transaction_keeps_freelist() -> Result<()> {
    let mut alloc = allocator(0);
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 8, |_| {})?;
    commit_all(&mut alloc, &mut tx, false)?;
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().free(&mut tx, PageId(3));
    commit_all(&mut alloc, &mut tx, false)?;
    let before = alloc.clone();

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    let mut st = alloc.file_commit_prepare(&mut tx, false)?;
    assert!(!st.updated());
    alloc.file_commit_alloc(&mut tx, &mut st)?;
    let mut written = 0;
    alloc.file_commit_serialize(&st, |_, _| {
        written += 1;
        Ok(())
    })?;
    assert_eq!(written, 0);

    let mut meta = MetaPage::new(512, 0);
    alloc.file_commit_meta(&st, &mut meta);
    assert_eq!(meta.freelist_root, before.freelist_root());
    assert_eq!(meta.data_end_marker, before.data_area().end_marker());
    assert_eq!(meta.meta_total, before.meta_total());

    alloc.commit(&mut tx, st)?;
    assert_eq!(alloc, before);
    Ok(())
}

#[test]
fn failed_serialization_rolls_back_cleanly() -> Result<()> {
    let mut alloc = allocator(0);
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 16, |_| {})?;
    commit_all(&mut alloc, &mut tx, false)?;
    let before = alloc.clone();

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    for id in [4, 9, 11] {
        alloc.data_allocator().free(&mut tx, PageId(id));
    }
    alloc.wal_allocator().alloc(&mut tx)?;
    let mut st = alloc.file_commit_prepare(&mut tx, false)?;
    alloc.file_commit_alloc(&mut tx, &mut st)?;
    let err = alloc
        .file_commit_serialize(&st, |_, _| {
            Err(AllocError::Io(io::Error::new(io::ErrorKind::Other, "disk full")))
        })
        .unwrap_err();
    match err {
        AllocError::Serialization { page, source } => {
            assert_eq!(page, st.freelist_root());
            assert!(matches!(*source, AllocError::Io(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    alloc.rollback(&mut tx)?;
    assert_eq!(alloc, before);
    Ok(())
}

#[test]
fn forced_commit_returns_pages_past_limit() -> Result<()> {
    let boot = Allocator::bootstrap(&AllocatorOptions {
        page_size: 512,
        init_meta_area: 4,
        ..AllocatorOptions::default()
    })?;
    let mut alloc = boot.allocator;
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 30, |_| {})?;
    commit_all(&mut alloc, &mut tx, false)?;
    assert_eq!(alloc.file_end(), PageId(36));

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    for id in 24..36 {
        alloc.data_allocator().free(&mut tx, PageId(id));
    }
    commit_all(&mut alloc, &mut tx, false)?;
    assert_eq!(alloc.file_end(), PageId(36));
    assert_eq!(alloc.meta_total(), 4);
    assert!(!alloc.can_release_regions());

    alloc.set_max_size(24 * 512);
    assert!(alloc.can_release_regions());

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    let mut st = alloc.file_commit_prepare(&mut tx, true)?;
    assert!(st.updated());
    alloc.file_commit_alloc(&mut tx, &mut st)?;
    assert_eq!(st.overflow_freed(), 12);
    assert_eq!(st.data_end_marker(), PageId(24));
    assert_eq!(st.meta_end_marker(), PageId(24));
    alloc.commit(&mut tx, st)?;

    assert_eq!(alloc.file_end(), PageId(24));
    assert!(alloc.data_area().freelist().is_empty());
    assert_eq!(alloc.meta_total(), 4);
    assert!(!alloc.can_release_regions());
    Ok(())
}
