// Reorder all rows of a table by the values of one column

use std::cmp::Ordering;

use crate::storage::table::SparseTable;
use crate::Index;

impl SparseTable {
    /// Sort rows by the bytes of column `col`, lexicographically.
    ///
    /// See [`SparseTable::sort_by_column_with`].
    pub fn sort_by_column(&mut self, col: Index) -> Vec<(Index, Index)> {
        self.sort_by_column_with(col, |a, b| a.cmp(b))
    }

    /// Sort rows by column `col` under `cmp` and apply the same permutation
    /// to every column.
    ///
    /// Only row keys holding at least one cell take part. They are reordered
    /// among themselves, so the set of occupied row keys is unchanged and rows
    /// without any cell keep their index. Returns `(new_row, old_row)` for
    /// every row holding a cell, in ascending `new_row` order.
    ///
    /// The sort is not stable. Rows with no cell in `col` currently end up
    /// after all present cells, in their previous relative order; callers
    /// should not rely on either.
    pub fn sort_by_column_with<F>(&mut self, col: Index, mut cmp: F) -> Vec<(Index, Index)>
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        let mut slots: Vec<Index> = Vec::new();
        for column in self.present_columns() {
            slots.extend(self.column_iter(column).map(|(row, _)| row));
        }
        slots.sort_unstable();
        slots.dedup();

        let mut order: Vec<usize> = (0..slots.len()).collect();
        if slots.len() >= 2 {
            let mut keys: Vec<Option<&[u8]>> = vec![None; slots.len()];
            for (row, bytes) in self.column_iter(col) {
                if let Ok(i) = slots.binary_search(&row) {
                    keys[i] = Some(bytes);
                }
            }
            order.sort_unstable_by(|&a, &b| match (keys[a], keys[b]) {
                (Some(x), Some(y)) => cmp(x, y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(&b),
            });
        }

        // targets[i]: where the row at slots[i] moves to
        let mut targets: Vec<Index> = vec![0; slots.len()];
        for (new, &old) in order.iter().enumerate() {
            targets[old] = slots[new];
        }
        if order.iter().enumerate().any(|(new, &old)| new != old) {
            self.remap_rows(|row| slots.binary_search(&row).map_or(row, |i| targets[i]));
        }

        order
            .iter()
            .enumerate()
            .map(|(new, &old)| (slots[new], slots[old]))
            .collect()
    }
}
