use log::debug;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::field::Cell;

/// Owner value of a cell nobody holds.
const VACANT: u32 = u32::MAX;

/// Tracks which agent holds each cell and enforces at most one agent per cell.
///
/// Every cell has an atomic owner slot, so `reserve` is a single compare-and-swap
/// and stays correct even if movement is ever driven from several threads.
/// Cells passed in must come from a `Field` of the same dimensions.
#[derive(Debug)]
pub struct OccupancyIndex {
    width: usize,
    owners: Vec<AtomicU32>,
    occupied: AtomicUsize,
    stale_releases: AtomicU64,
}

impl OccupancyIndex {
    pub fn new(width: usize, height: usize) -> Self {
        OccupancyIndex {
            width,
            owners: (0..width * height).map(|_| AtomicU32::new(VACANT)).collect(),
            occupied: AtomicUsize::new(0),
            stale_releases: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    fn slot(&self, cell: Cell) -> &AtomicU32 {
        &self.owners[cell.y * self.width + cell.x]
    }

    /// Claims `cell` for `agent`. Returns `false` if the cell is already held
    /// (including by `agent` itself).
    pub fn reserve(&self, cell: Cell, agent: usize) -> bool {
        let claimed = self
            .slot(cell)
            .compare_exchange(VACANT, agent as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.occupied.fetch_add(1, Ordering::Relaxed);
        }
        claimed
    }

    /// Frees `cell` if `agent` holds it.
    ///
    /// Releasing a cell the agent does not hold is tolerated: it is counted and
    /// logged, the cell is left as it was, and `false` is returned.
    pub fn release(&self, cell: Cell, agent: usize) -> bool {
        match self
            .slot(cell)
            .compare_exchange(agent as u32, VACANT, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.occupied.fetch_sub(1, Ordering::Relaxed);
                true
            }
            Err(holder) => {
                self.stale_releases.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Agent {} released ({}, {}) which it does not hold (holder: {}).",
                    agent,
                    cell.x,
                    cell.y,
                    if holder == VACANT { "none".to_string() } else { holder.to_string() }
                );
                false
            }
        }
    }

    pub fn is_occupied(&self, cell: Cell) -> bool {
        self.slot(cell).load(Ordering::Acquire) != VACANT
    }

    /// The agent holding `cell`, if any.
    pub fn owner(&self, cell: Cell) -> Option<usize> {
        match self.slot(cell).load(Ordering::Acquire) {
            VACANT => None,
            id => Some(id as usize),
        }
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many releases so far targeted a cell the caller did not hold.
    pub fn stale_releases(&self) -> u64 {
        self.stale_releases.load(Ordering::Relaxed)
    }

    /// All occupied cells in row-major order.
    pub fn occupied_cells(&self) -> Vec<Cell> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| owner.load(Ordering::Acquire) != VACANT)
            .map(|(idx, _)| Cell::new(idx % self.width, idx / self.width))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn reserve_is_exclusive() {
        let index = OccupancyIndex::new(4, 4);
        let cell = Cell::new(1, 2);
        assert!(index.reserve(cell, 0));
        assert!(!index.reserve(cell, 1));
        assert!(!index.reserve(cell, 0));
        assert_eq!(index.owner(cell), Some(0));
        assert!(index.is_occupied(cell));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn release_frees_the_cell() {
        let index = OccupancyIndex::new(4, 4);
        let cell = Cell::new(3, 3);
        index.reserve(cell, 5);
        assert!(index.release(cell, 5));
        assert!(!index.is_occupied(cell));
        assert!(index.is_empty());
        assert!(index.reserve(cell, 6));
    }

    #[test]
    fn stale_release_is_counted_not_fatal() {
        let index = OccupancyIndex::new(4, 4);
        let held = Cell::new(0, 0);
        index.reserve(held, 1);

        assert!(!index.release(Cell::new(2, 2), 1)); // never reserved
        assert!(!index.release(held, 2)); // held by someone else
        assert_eq!(index.stale_releases(), 2);
        assert_eq!(index.owner(held), Some(1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn occupied_cells_lists_row_major() {
        let index = OccupancyIndex::new(3, 2);
        index.reserve(Cell::new(2, 1), 0);
        index.reserve(Cell::new(0, 1), 1);
        index.reserve(Cell::new(1, 0), 2);
        assert_eq!(
            index.occupied_cells(),
            vec![Cell::new(1, 0), Cell::new(0, 1), Cell::new(2, 1)]
        );
    }

    #[test]
    fn concurrent_reservations_have_one_winner() {
        let index = OccupancyIndex::new(2, 2);
        let cell = Cell::new(1, 1);
        let winners = (0..64usize)
            .into_par_iter()
            .filter(|&agent| index.reserve(cell, agent))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(index.len(), 1);
    }
}
