#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Once;

use txalloc::alloc::AllocCommitState;
use txalloc::{
    AllocError, Allocator, AllocatorOptions, MetaPage, PageId, Region, RegionList, Result,
    TxAllocState,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn options(max_pages: u64) -> AllocatorOptions {
    AllocatorOptions {
        max_pages,
        ..AllocatorOptions::default()
    }
}

fn r(id: u64, count: u32) -> Region {
    Region::new(PageId(id), count)
}

/// Runs every commit phase, collecting the serialized freelist pages.
fn commit(
    alloc: &mut Allocator,
    tx: &mut TxAllocState,
    pages: &mut HashMap<PageId, Vec<u8>>,
) -> Result<AllocCommitState> {
    let mut st = alloc.file_commit_prepare(tx, false)?;
    alloc.file_commit_alloc(tx, &mut st)?;
    alloc.file_commit_serialize(&st, |id, buf| {
        pages.insert(id, buf.to_vec());
        Ok(())
    })?;
    let kept = st.clone();
    alloc.commit(tx, st)?;
    Ok(kept)
}

#[test]
fn freed_pages_become_reusable_after_commit() -> Result<()> {
    init_tracing();
    let mut alloc = Allocator::new(&options(0))?;
    let mut pages = HashMap::new();

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    let mut got = Vec::new();
    alloc
        .data_allocator()
        .alloc_regions_with(&mut tx, 10, |region| got.push(region))?;
    assert_eq!(got, vec![r(2, 10)]);
    let st = commit(&mut alloc, &mut tx, &mut pages)?;
    assert!(st.updated());
    assert!(st.alloc_regions().is_empty());
    assert_eq!(alloc.data_area().end_marker(), PageId(12));
    assert_eq!(alloc.meta_area().end_marker(), PageId(12));
    assert_eq!(alloc.freelist_root(), PageId::NULL);

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().free(&mut tx, PageId(5));
    alloc.data_allocator().free(&mut tx, PageId(6));
    // pending frees are not reusable within the transaction
    assert_eq!(alloc.data_area().freelist().avail(), 0);
    let st = commit(&mut alloc, &mut tx, &mut pages)?;

    // the meta area grew out of the data area to hold the freelist page
    assert_eq!(tx.stats().to_meta, 2);
    assert_eq!(alloc.meta_total(), 2);
    assert_eq!(st.alloc_regions().as_slice(), &[r(13, 1)]);
    assert_eq!(alloc.freelist_root(), PageId(13));
    assert_eq!(alloc.data_area().freelist().regions().as_slice(), &[r(5, 2)]);
    assert_eq!(alloc.meta_area().freelist().regions().as_slice(), &[r(12, 1)]);
    assert!(pages.contains_key(&PageId(13)));

    let stats = alloc.stats();
    assert_eq!(stats.file_end, PageId(14));
    assert_eq!(stats.data_free, 2);
    assert_eq!(stats.data_allocated, 8);
    assert_eq!(stats.meta_allocated, 1);

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    let region = alloc.data_allocator().alloc_continuous_region(&mut tx, 2)?;
    assert_eq!(region, r(5, 2));
    Ok(())
}

#[test]
fn page_limit_with_and_without_overflow() -> Result<()> {
    init_tracing();
    let mut alloc = Allocator::new(&options(10))?;
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 8, |_| {})?;
    assert_eq!(alloc.data_allocator().avail(&tx), 0);

    let err = alloc
        .data_allocator()
        .alloc_continuous_region(&mut tx, 1)
        .unwrap_err();
    assert!(matches!(
        err,
        AllocError::OutOfMemory {
            requested: 1,
            avail: 0
        }
    ));
    let err = alloc
        .data_allocator()
        .alloc_regions_with(&mut tx, 3, |_| {})
        .unwrap_err();
    assert!(matches!(err, AllocError::OutOfMemory { requested: 3, .. }));
    alloc.rollback(&mut tx)?;

    let mut tx = alloc.make_tx_alloc_state(true, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 8, |_| {})?;
    let region = alloc.data_allocator().alloc_continuous_region(&mut tx, 1)?;
    assert_eq!(region, r(10, 1));
    assert_eq!(tx.stats().overflow, 1);
    assert_eq!(alloc.file_end(), PageId(11));

    // a page claimed in this transaction is handed back at once
    alloc.data_allocator().free(&mut tx, PageId(10));
    assert_eq!(alloc.data_area().end_marker(), PageId(10));
    assert_eq!(alloc.meta_area().end_marker(), PageId(10));
    assert!(alloc.data_area().freelist().is_empty());
    Ok(())
}

#[test]
fn meta_area_grows_to_power_of_two_quota() -> Result<()> {
    init_tracing();
    let mut alloc = Allocator::new(&options(0))?;
    let before = alloc.clone();
    let mut tx = alloc.make_tx_alloc_state(false, 0);

    alloc.meta_manager().ensure(&mut tx, 100)?;
    assert_eq!(alloc.meta_total(), 128);
    assert_eq!(alloc.meta_area().freelist().avail(), 128);
    assert_eq!(tx.manager().moves().len(), 1);
    assert_eq!(tx.manager().move_to_meta(), RegionList::from_unsorted(vec![r(2, 128)]));
    assert_eq!(tx.stats().to_meta, 128);

    // already large enough
    alloc.meta_manager().ensure(&mut tx, 2)?;
    assert_eq!(alloc.meta_total(), 128);

    alloc.rollback(&mut tx)?;
    assert_eq!(alloc, before);
    Ok(())
}

#[test]
fn wal_pages_come_from_meta_area_front() -> Result<()> {
    init_tracing();
    let opts = AllocatorOptions {
        init_meta_area: 8,
        ..options(64)
    };
    let boot = Allocator::bootstrap(&opts)?;
    let mut alloc = boot.allocator;
    let mut tx = alloc.make_tx_alloc_state(false, 0);

    let first = alloc.wal_allocator().alloc(&mut tx)?;
    let second = alloc.wal_allocator().alloc(&mut tx)?;
    assert_eq!((first, second), (PageId(3), PageId(4)));

    let mut tail = Vec::new();
    alloc
        .meta_allocator()
        .alloc_regions_with(&mut tx, 2, |region| tail.push(region))?;
    assert_eq!(tail, vec![r(8, 2)]);
    assert_eq!(tx.stats().meta.alloc, 4);

    alloc.wal_allocator().free(&mut tx, first);
    assert!(tx.meta().freed().has(first));
    assert!(!alloc.meta_area().freelist().regions().contains(first));
    Ok(())
}

#[test]
#[should_panic(expected = "invalid free of page")]
fn freeing_past_end_marker_panics() {
    let mut alloc = Allocator::new(&options(0)).unwrap();
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().free(&mut tx, PageId(2));
}

#[test]
fn committed_state_reloads_from_freelist_pages() -> Result<()> {
    init_tracing();
    let opts = AllocatorOptions {
        page_size: 128,
        ..options(0)
    };
    let mut alloc = Allocator::new(&opts)?;
    let mut pages = HashMap::new();

    let mut tx = alloc.make_tx_alloc_state(false, 0);
    alloc.data_allocator().alloc_regions_with(&mut tx, 40, |_| {})?;
    commit(&mut alloc, &mut tx, &mut pages)?;

    // every other page free makes the list span several freelist pages
    let mut tx = alloc.make_tx_alloc_state(false, 0);
    for id in (2..42).step_by(2) {
        alloc.data_allocator().free(&mut tx, PageId(id));
    }
    let st = commit(&mut alloc, &mut tx, &mut pages)?;
    assert!(st.alloc_regions().count_pages() > 1);

    // an unchanged transaction writes the live allocator fields
    let mut meta = MetaPage::new(opts.page_size, 0);
    let mut idle = alloc.make_tx_alloc_state(false, 0);
    let st_idle = alloc.file_commit_prepare(&mut idle, false)?;
    assert!(!st_idle.updated());
    alloc.file_commit_meta(&st_idle, &mut meta);
    assert_eq!(meta.freelist_root, PageId(45));

    let source = |id: PageId, buf: &mut [u8]| -> Result<()> {
        let page = pages.get(&id).ok_or(AllocError::Corruption("missing page"))?;
        buf.copy_from_slice(page);
        Ok(())
    };
    let reloaded = Allocator::read_allocator_state(&opts, &meta, &source)?;
    assert_eq!(reloaded, alloc);
    Ok(())
}
