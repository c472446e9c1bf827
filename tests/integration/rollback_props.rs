#![allow(missing_docs)]

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use txalloc::alloc::AllocCommitState;
use txalloc::{
    AllocError, Allocator, AllocatorOptions, MetaPage, PageId, Region, Result, TxAllocState,
};

const PAGE_SIZE: u32 = 256;
const SEED: u64 = 0x7a11_0c8e;

#[derive(Clone, Debug)]
enum Op {
    AllocData(u64),
    AllocContinuous(u64),
    FreeData(usize),
    AllocWal,
    FreeWal(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..=12).prop_map(Op::AllocData),
        (1u64..=6).prop_map(Op::AllocContinuous),
        any::<usize>().prop_map(Op::FreeData),
        Just(Op::AllocWal),
        any::<usize>().prop_map(Op::FreeWal),
    ]
}

/// Pages owned by callers, used to detect double allocation.
#[derive(Clone, Debug, Default)]
struct Model {
    data: BTreeSet<PageId>,
    wal: BTreeSet<PageId>,
}

impl Model {
    fn claim(&mut self, alloc: &Allocator, region: Region, wal: bool) {
        for id in region.pages() {
            assert!(id.0 >= 2, "reserved page {id} handed out");
            assert!(id < alloc.file_end(), "page {id} past file end");
            assert!(
                !alloc.freelist_pages().contains(id),
                "page {id} still holds the committed freelist"
            );
            assert!(!self.data.contains(&id), "data page {id} allocated twice");
            assert!(!self.wal.contains(&id), "wal page {id} allocated twice");
            if wal {
                self.wal.insert(id);
            } else {
                self.data.insert(id);
            }
        }
    }
}

fn take_nth(set: &mut BTreeSet<PageId>, idx: usize) -> Option<PageId> {
    if set.is_empty() {
        return None;
    }
    let id = *set.iter().nth(idx % set.len())?;
    set.remove(&id);
    Some(id)
}

fn apply(alloc: &mut Allocator, tx: &mut TxAllocState, model: &mut Model, op: &Op) -> Result<()> {
    match *op {
        Op::AllocData(n) => {
            let mut got = Vec::new();
            alloc
                .data_allocator()
                .alloc_regions_with(tx, n, |region| got.push(region))?;
            assert_eq!(got.iter().map(|r| r.count as u64).sum::<u64>(), n);
            for region in got {
                model.claim(alloc, region, false);
            }
        }
        Op::AllocContinuous(n) => {
            let region = alloc.data_allocator().alloc_continuous_region(tx, n)?;
            assert_eq!(region.count as u64, n);
            model.claim(alloc, region, false);
        }
        Op::FreeData(idx) => {
            if let Some(id) = take_nth(&mut model.data, idx) {
                alloc.data_allocator().free(tx, id);
            }
        }
        Op::AllocWal => {
            let id = alloc.wal_allocator().alloc(tx)?;
            model.claim(alloc, Region::new(id, 1), true);
        }
        Op::FreeWal(idx) => {
            if let Some(id) = take_nth(&mut model.wal, idx) {
                alloc.wal_allocator().free(tx, id);
            }
        }
    }
    Ok(())
}

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

fn check_committed(alloc: &Allocator, model: &Model, st: &AllocCommitState) {
    for id in st.alloc_regions().pages() {
        assert!(!model.data.contains(&id) && !model.wal.contains(&id));
    }
    let stats = alloc.stats();
    assert_eq!(stats.data_allocated, model.data.len() as u64);
    assert_eq!(
        stats.meta_allocated,
        model.wal.len() as u64 + alloc.freelist_pages().count_pages()
    );
}

fn reload(alloc: &Allocator, opts: &AllocatorOptions, pages: &HashMap<PageId, Vec<u8>>) -> Allocator {
    let mut meta = MetaPage::new(PAGE_SIZE, 0);
    meta.freelist_root = alloc.freelist_root();
    meta.data_end_marker = alloc.data_area().end_marker();
    meta.meta_end_marker = alloc.meta_area().end_marker();
    meta.meta_total = alloc.meta_total();
    let source = |id: PageId, buf: &mut [u8]| -> Result<()> {
        let page = pages.get(&id).ok_or(AllocError::Corruption("missing page"))?;
        buf.copy_from_slice(page);
        Ok(())
    };
    Allocator::read_allocator_state(opts, &meta, &source).unwrap()
}

fn options() -> AllocatorOptions {
    AllocatorOptions {
        page_size: PAGE_SIZE,
        ..AllocatorOptions::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rollback_restores_allocator(
        setup in prop::collection::vec(arb_op(), 0..40),
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let opts = options();
        let mut alloc = Allocator::new(&opts).unwrap();
        let mut pages = HashMap::new();
        let mut model = Model::default();

        let mut tx = alloc.make_tx_alloc_state(false, 0);
        for op in &setup {
            apply(&mut alloc, &mut tx, &mut model, op).unwrap();
        }
        commit(&mut alloc, &mut tx, &mut pages).unwrap();

        let before = alloc.clone();
        let mut scratch = model.clone();
        let mut tx = alloc.make_tx_alloc_state(false, 0);
        for op in &ops {
            apply(&mut alloc, &mut tx, &mut scratch, op).unwrap();
        }
        alloc.rollback(&mut tx).unwrap();
        prop_assert_eq!(&alloc, &before);
        prop_assert!(alloc.rollback(&mut tx).is_err());
    }

    #[test]
    fn committed_transactions_never_hand_out_pages_twice(
        txs in prop::collection::vec(
            (prop::collection::vec(arb_op(), 1..30), any::<bool>()),
            1..8,
        ),
    ) {
        let opts = options();
        let mut alloc = Allocator::new(&opts).unwrap();
        let mut pages = HashMap::new();
        let mut model = Model::default();

        for (ops, keep) in &txs {
            let before = alloc.clone();
            let mut scratch = model.clone();
            let mut tx = alloc.make_tx_alloc_state(false, 0);
            for op in ops {
                apply(&mut alloc, &mut tx, &mut scratch, op).unwrap();
            }
            if *keep {
                let st = commit(&mut alloc, &mut tx, &mut pages).unwrap();
                model = scratch;
                check_committed(&alloc, &model, &st);
                prop_assert_eq!(reload(&alloc, &opts, &pages), alloc.clone());
            } else {
                alloc.rollback(&mut tx).unwrap();
                prop_assert_eq!(&alloc, &before);
            }
        }
    }
}

/// Runs `rounds` random transactions against a page-limited allocator,
/// committing or rolling back each one. Every transaction enables the
/// overflow area with probability `overflow_odds`.
///
/// Returns the number of commits and of transactions that used overflow.
fn seeded_run(opts: &AllocatorOptions, seed: u64, rounds: usize, overflow_odds: f64) -> (u32, u32) {
    let mut alloc = Allocator::new(opts).unwrap();
    let mut pages = HashMap::new();
    let mut model = Model::default();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut commits = 0;
    let mut overflowed = 0;

    for _ in 0..rounds {
        let before = alloc.clone();
        let mut scratch = model.clone();
        let overflow = rng.gen_bool(overflow_odds);
        let limit = before.file_end().0.max(opts.max_pages);
        let mut tx = alloc.make_tx_alloc_state(overflow, 0);
        let mut failed = false;
        for _ in 0..rng.gen_range(1..20) {
            let op = match rng.gen_range(0..6) {
                0 => Op::AllocData(rng.gen_range(1..10)),
                1 => Op::AllocContinuous(rng.gen_range(1..5)),
                2 | 3 => Op::FreeData(rng.gen()),
                4 => Op::FreeWal(rng.gen()),
                _ => Op::AllocWal,
            };
            match apply(&mut alloc, &mut tx, &mut scratch, &op) {
                Ok(()) => {}
                Err(AllocError::OutOfMemory { .. }) => {
                    assert!(!overflow, "out of memory with overflow enabled");
                    failed = true;
                    break;
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
            if !overflow {
                assert!(alloc.file_end().0 <= limit);
            }
        }
        if tx.stats().overflow > 0 {
            overflowed += 1;
        }

        let committed = !failed && rng.gen_bool(0.7);
        let result = if committed {
            commit(&mut alloc, &mut tx, &mut pages).map(Some)
        } else {
            Ok(None)
        };
        match result {
            Ok(Some(st)) => {
                model = scratch;
                check_committed(&alloc, &model, &st);
                assert_eq!(reload(&alloc, opts, &pages), alloc);
                commits += 1;
            }
            Ok(None) | Err(AllocError::OutOfMemory { .. }) => {
                alloc.rollback(&mut tx).unwrap();
                assert_eq!(alloc, before);
            }
            Err(err) => panic!("unexpected commit error: {err}"),
        }
    }
    (commits, overflowed)
}

#[test]
fn seeded_stress_with_page_limit() {
    let opts = AllocatorOptions {
        page_size: PAGE_SIZE,
        max_pages: 96,
        ..AllocatorOptions::default()
    };
    let (commits, overflowed) = seeded_run(&opts, SEED, 200, 0.0);
    assert!(commits > 0);
    assert_eq!(overflowed, 0);
}

#[test]
fn seeded_stress_with_overflow_area() {
    let opts = AllocatorOptions {
        page_size: PAGE_SIZE,
        max_pages: 24,
        ..AllocatorOptions::default()
    };
    let mut commits = 0;
    let mut overflowed = 0;
    for seed in 0..64 {
        let (c, o) = seeded_run(&opts, SEED ^ seed, 30, 0.5);
        commits += c;
        overflowed += o;
    }
    assert!(commits > 0);
    assert!(overflowed > 0);
}
