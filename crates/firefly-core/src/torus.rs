// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Torus Topology
// ─────────────────────────────────────────────────────────────────────
//! Row-major rows×cols grid with wraparound in both dimensions.
//!
//! Cell `(r, c)` has index `r·cols + c`, which is also its oscillator id.
//! Neighbors are always reported in the order up, down, left, right.

use firefly_types::{GridPos, SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Torus {
    rows: usize,
    cols: usize,
}

impl Torus {
    pub fn new(rows: usize, cols: usize) -> SyncResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(SyncError::Config(format!(
                "torus needs at least one row and column, got {rows}x{cols}"
            )));
        }
        Ok(Self { rows, cols })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of cells; never zero.
    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.row < self.rows && pos.col < self.cols
    }

    pub fn index(&self, pos: GridPos) -> SyncResult<usize> {
        if !self.contains(pos) {
            return Err(SyncError::OutOfBounds {
                row: pos.row,
                col: pos.col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(pos.row * self.cols + pos.col)
    }

    /// Position of a row-major index. Indices past the end wrap.
    pub fn pos(&self, index: usize) -> GridPos {
        let index = index % self.cell_count();
        GridPos::new(index / self.cols, index % self.cols)
    }

    /// Up, down, left, right with wraparound.
    ///
    /// On degenerate tori some entries coincide or equal `pos` itself:
    /// a 1×1 torus returns `pos` four times, a 2×2 torus returns each
    /// neighbor twice.
    pub fn neighbors(&self, pos: GridPos) -> [GridPos; 4] {
        let (rows, cols) = (self.rows, self.cols);
        let (r, c) = (pos.row % rows, pos.col % cols);
        [
            GridPos::new((r + rows - 1) % rows, c),
            GridPos::new((r + 1) % rows, c),
            GridPos::new(r, (c + cols - 1) % cols),
            GridPos::new(r, (c + 1) % cols),
        ]
    }

    pub fn neighbor_indices(&self, index: usize) -> [usize; 4] {
        self.neighbors(self.pos(index))
            .map(|p| p.row * self.cols + p.col)
    }

    /// Every undirected edge once, as (cell, down) and (cell, right) pairs.
    ///
    /// A 1-wide dimension has no edges along it. A 2-wide dimension has
    /// one edge per pair of cells, reported from row or column 0.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.cell_count()).flat_map(move |i| {
            let pos = self.pos(i);
            let [_, down, _, right] = self.neighbor_indices(i);
            let vertical = self.rows > 2 || (self.rows == 2 && pos.row == 0);
            let horizontal = self.cols > 2 || (self.cols == 2 && pos.col == 0);
            [(vertical, (i, down)), (horizontal, (i, right))]
                .into_iter()
                .filter_map(|(keep, edge)| keep.then_some(edge))
        })
    }
}
