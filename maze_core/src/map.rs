use std::ops::{Index, IndexMut};

use crate::{ConfigError, Position};

/// A generic 2D grid structure.
///
/// Stores elements of type `T` in a flat vector using row-major order.
/// Cells are addressed by [`Position`] (row, col).
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

/// Number of cells in a `rows` x `cols` grid of `T`, if such a grid can be allocated.
fn cell_count<T>(rows: usize, cols: usize) -> Result<usize, ConfigError> {
    if rows == 0 || cols == 0 {
        return Err(ConfigError::EmptyGrid { rows, cols });
    }
    let count = rows.checked_mul(cols);
    let bytes = count.and_then(|count| count.checked_mul(std::mem::size_of::<T>()));
    match (count, bytes) {
        (Some(count), Some(bytes)) if bytes <= isize::MAX as usize => Ok(count),
        _ => Err(ConfigError::GridTooLarge { rows, cols }),
    }
}

impl<T> Grid<T> {
    /// Creates a new grid with every cell set to a clone of `value`.
    ///
    /// Fails if either dimension is zero or the grid is too large to allocate.
    pub fn filled(rows: usize, cols: usize, value: T) -> Result<Self, ConfigError>
    where
        T: Clone,
    {
        let count = cell_count::<T>(rows, cols)?;
        Ok(Grid {
            rows,
            cols,
            cells: vec![value; count],
        })
    }

    /// Creates a grid of the same shape as `self` with every cell set to `value`.
    ///
    /// `U` must be no larger than `T`, which the shape was sized for.
    pub(crate) fn filled_like<U: Clone>(&self, value: U) -> Grid<U> {
        Grid {
            rows: self.rows,
            cols: self.cols,
            cells: vec![value; self.cells.len()],
        }
    }

    /// Returns the number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Converts a position to a flat vector index.
    ///
    /// Returns `None` if the position is out of bounds.
    #[inline]
    fn position_to_index(&self, position: Position) -> Option<usize> {
        if self.is_valid(position) {
            Some(position.row * self.cols + position.col)
        } else {
            None
        }
    }

    #[inline]
    fn index_to_position(&self, index: usize) -> Position {
        Position {
            row: index / self.cols,
            col: index % self.cols,
        }
    }

    /// Checks if the given position is within the grid boundaries.
    #[inline]
    pub fn is_valid(&self, position: Position) -> bool {
        position.row < self.rows && position.col < self.cols
    }

    /// Gets an immutable reference to the cell at the given position.
    pub fn get(&self, position: Position) -> Option<&T> {
        let index = self.position_to_index(position)?;
        self.cells.get(index)
    }

    /// Gets a mutable reference to the cell at the given position.
    pub fn get_mut(&mut self, position: Position) -> Option<&mut T> {
        let index = self.position_to_index(position)?;
        self.cells.get_mut(index)
    }

    /// Returns an iterator over the cells of the grid in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }

    /// Returns an iterator that yields `(position, &T)` for each cell.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| (self.index_to_position(index), cell))
    }
}

impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Position) -> &Self::Output {
        match self.position_to_index(index) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index {} out of bounds for grid size ({}, {})",
                index, self.rows, self.cols
            ),
        }
    }
}

impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, index: Position) -> &mut Self::Output {
        let (rows, cols) = (self.rows, self.cols);
        match self.position_to_index(index) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index {} out of bounds for grid size ({}, {})",
                index, rows, cols
            ),
        }
    }
}
