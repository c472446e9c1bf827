use super::page_set::PageSet;
use super::region::{Region, RegionList};
use crate::types::{AllocError, PageId, Result};

/// Default share (in percent) of the meta area that may be in use before it grows.
pub const DEFAULT_META_GROW_PERCENTAGE: u32 = 80;

/// The two logical areas pages belong to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Area {
    /// User content pages.
    Data,
    /// Allocator and engine bookkeeping pages.
    Meta,
}

/// Area membership of a region touched by the rebalancing logic.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegionState {
    /// Membership is settled.
    Stable(Area),
    /// Taken from the data area, lent to the meta area until commit.
    MovingToMeta,
    /// Being handed back to the data area by a rollback.
    MovingToData,
}

/// Per-transaction options chosen by the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxAllocOptions {
    /// Allow allocating pages with id `>= max_pages` when the areas are full.
    pub overflow_area_enabled: bool,
    /// Meta area usage (percent) that triggers growth. Zero selects the default.
    pub meta_grow_percentage: u32,
}

impl Default for TxAllocOptions {
    fn default() -> Self {
        Self {
            overflow_area_enabled: false,
            meta_grow_percentage: DEFAULT_META_GROW_PERCENTAGE,
        }
    }
}

/// Page counters for one area.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AreaStats {
    /// Pages handed out.
    pub alloc: u64,
    /// Pages released.
    pub freed: u64,
}

/// Counters collected while a transaction runs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TxAllocStats {
    /// Data area counters. Pages moved into the meta area count as data allocations.
    pub data: AreaStats,
    /// Meta area counters.
    pub meta: AreaStats,
    /// Pages moved from the data area into the meta area.
    pub to_meta: u64,
    /// Pages allocated past `max_pages`.
    pub overflow: u64,
}

/// Changes one transaction made to a single area.
#[derive(Clone, Debug, Default)]
pub struct TxArea {
    pub(crate) end_marker: PageId,
    pub(crate) allocated: PageSet,
    pub(crate) new: PageSet,
    pub(crate) freed: PageSet,
}

impl TxArea {
    pub(crate) fn new(end_marker: PageId) -> Self {
        Self {
            end_marker,
            ..Self::default()
        }
    }

    /// End marker of the area when the transaction started.
    pub fn end_marker(&self) -> PageId {
        self.end_marker
    }

    /// Pages taken from the freelist.
    pub fn allocated(&self) -> &PageSet {
        &self.allocated
    }

    /// Pages claimed past the end marker.
    pub fn new_pages(&self) -> &PageSet {
        &self.new
    }

    /// Pages released, pending until commit.
    pub fn freed(&self) -> &PageSet {
        &self.freed
    }

    /// True if pages were allocated or freed in this area.
    pub fn updated(&self) -> bool {
        !self.allocated.is_empty() || !self.new.is_empty() || !self.freed.is_empty()
    }
}

/// Regions moved between areas during the transaction.
#[derive(Clone, Debug, Default)]
pub struct TxAreaManageState {
    moves: Vec<(Region, RegionState)>,
}

impl TxAreaManageState {
    pub(crate) fn record_move_to_meta(&mut self, region: Region) {
        self.moves.push((region, RegionState::MovingToMeta));
    }

    /// Every tracked region with its current state.
    pub fn moves(&self) -> &[(Region, RegionState)] {
        &self.moves
    }

    /// Regions currently lent to the meta area.
    pub fn move_to_meta(&self) -> RegionList {
        self.moves
            .iter()
            .filter(|(_, state)| *state == RegionState::MovingToMeta)
            .map(|(region, _)| *region)
            .collect()
    }

    /// Settles every in-flight move into its destination area.
    pub(crate) fn resolve(&mut self) {
        for (_, state) in &mut self.moves {
            *state = match *state {
                RegionState::MovingToMeta => RegionState::Stable(Area::Meta),
                RegionState::MovingToData => RegionState::Stable(Area::Data),
                stable => stable,
            };
        }
    }

    /// Turns every pending data->meta move around and returns the regions involved.
    pub(crate) fn revert(&mut self) -> Vec<Region> {
        let mut reverted = Vec::new();
        for (region, state) in &mut self.moves {
            if *state == RegionState::MovingToMeta {
                *state = RegionState::MovingToData;
                reverted.push(*region);
            }
        }
        reverted
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TxPhase {
    Active,
    Committed,
    RolledBack,
}

/// Undo/redo log of the allocator changes made by one write transaction.
///
/// Freed pages are only recorded here and never handed back to the global
/// allocator before commit, so a page freed by this transaction can not be
/// reallocated and overwritten while the previous snapshot is still live.
#[derive(Clone, Debug)]
pub struct TxAllocState {
    pub(crate) manager: TxAreaManageState,
    pub(crate) data: TxArea,
    pub(crate) meta: TxArea,
    pub(crate) options: TxAllocOptions,
    pub(crate) stats: TxAllocStats,
    pub(crate) meta_total: u64,
    phase: TxPhase,
}

impl TxAllocState {
    pub(crate) fn new(
        data_end: PageId,
        meta_end: PageId,
        meta_total: u64,
        mut options: TxAllocOptions,
    ) -> Self {
        if options.meta_grow_percentage == 0 {
            options.meta_grow_percentage = DEFAULT_META_GROW_PERCENTAGE;
        }
        Self {
            manager: TxAreaManageState::default(),
            data: TxArea::new(data_end),
            meta: TxArea::new(meta_end),
            options,
            stats: TxAllocStats::default(),
            meta_total,
            phase: TxPhase::Active,
        }
    }

    /// True if any page was allocated or freed.
    pub fn updated(&self) -> bool {
        self.meta.updated() || self.data.updated()
    }

    /// Options the transaction was started with.
    pub fn options(&self) -> &TxAllocOptions {
        &self.options
    }

    /// Allocation counters for this transaction.
    pub fn stats(&self) -> &TxAllocStats {
        &self.stats
    }

    /// Data area changes.
    pub fn data(&self) -> &TxArea {
        &self.data
    }

    /// Meta area changes.
    pub fn meta(&self) -> &TxArea {
        &self.meta
    }

    /// Regions moved between the areas.
    pub fn manager(&self) -> &TxAreaManageState {
        &self.manager
    }

    /// False once the state has been committed or rolled back.
    pub fn is_active(&self) -> bool {
        self.phase == TxPhase::Active
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.phase {
            TxPhase::Active => Ok(()),
            TxPhase::Committed => Err(AllocError::InvalidUse(
                "transaction allocation state already committed",
            )),
            TxPhase::RolledBack => Err(AllocError::InvalidUse(
                "transaction allocation state already rolled back",
            )),
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.manager.resolve();
        self.phase = TxPhase::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.manager.resolve();
        self.phase = TxPhase::RolledBack;
    }
}
