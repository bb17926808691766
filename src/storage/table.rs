// Sparse row/column cell store
//
// Columns are kept in an outer block map keyed by column index; each column
// is a block map from row index to a `CellRef`. Cells parsed without
// unescaping borrow their bytes from the shared source buffer. Everything
// else, and every cell written after ingestion, lives in the arena.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::storage::arena::{Arena, ArenaSlot, DEFAULT_ARENA_BLOCK_SIZE};
use crate::storage::block_map::{BlockIndexMap, DEFAULT_BLOCK_SIZE};
use crate::{Index, MAX_INDEX};

/// Where the bytes of a cell live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRef {
    /// Span of the table's source buffer.
    Borrowed { offset: u32, len: u32 },
    /// Slot in the table's arena.
    Owned(ArenaSlot),
}

impl CellRef {
    pub fn len(&self) -> usize {
        match self {
            CellRef::Borrowed { len, .. } => *len as usize,
            CellRef::Owned(slot) => slot.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, CellRef::Borrowed { .. })
    }
}

pub type Column = BlockIndexMap<CellRef>;

#[derive(Debug, Clone)]
pub struct SparseTable {
    source: Bytes,
    columns: BlockIndexMap<Column>,
    arena: Arena,
    row_count: u64,
    column_count: u64,
    max_row: Index,
    max_column: Index,
    index_block_size: usize,
    allow_block_size_exceptions: bool,
}

impl Default for SparseTable {
    fn default() -> Self {
        SparseTable::new()
    }
}

impl SparseTable {
    pub fn new() -> Self {
        SparseTable {
            source: Bytes::new(),
            columns: BlockIndexMap::with_block_size(DEFAULT_BLOCK_SIZE),
            arena: Arena::new(DEFAULT_ARENA_BLOCK_SIZE),
            row_count: 0,
            column_count: 0,
            max_row: MAX_INDEX,
            max_column: MAX_INDEX,
            index_block_size: DEFAULT_BLOCK_SIZE,
            allow_block_size_exceptions: false,
        }
    }

    /// Buffer that borrowed cells point into.
    pub fn with_source(mut self, source: Bytes) -> Self {
        self.source = source;
        self
    }

    pub fn with_arena_block_size(mut self, block_size: usize) -> Self {
        self.arena = Arena::new(block_size);
        self
    }

    pub fn with_index_block_size(mut self, block_size: usize) -> Self {
        self.index_block_size = block_size.max(1);
        self.columns = BlockIndexMap::with_block_size(self.index_block_size)
            .with_max_key(self.max_column);
        self
    }

    pub fn with_max_indices(mut self, max_row: Index, max_column: Index) -> Self {
        self.max_row = max_row.min(MAX_INDEX);
        self.max_column = max_column.min(MAX_INDEX);
        self.columns = BlockIndexMap::with_block_size(self.index_block_size)
            .with_max_key(self.max_column);
        self
    }

    /// When set, writing a cell larger than an arena block fails instead of
    /// being refused quietly.
    pub fn with_block_size_exceptions(mut self, allow: bool) -> Self {
        self.allow_block_size_exceptions = allow;
        self
    }

    pub fn source(&self) -> &Bytes {
        &self.source
    }

    pub fn arena_block_size(&self) -> usize {
        self.arena.block_size()
    }

    /// Arena bytes in use, including bytes of outgrown or removed cells
    /// that [`SparseTable::compact`] has not reclaimed yet.
    pub fn arena_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }

    pub fn allows_block_size_exceptions(&self) -> bool {
        self.allow_block_size_exceptions
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn column_count(&self) -> u64 {
        self.column_count
    }

    pub fn max_row(&self) -> Index {
        self.max_row
    }

    pub fn max_column(&self) -> Index {
        self.max_column
    }

    /// Number of present cells.
    pub fn cell_count(&self) -> usize {
        self.columns.iter().map(|(_, column)| column.len()).sum()
    }

    #[inline]
    fn resolve(&self, cell: &CellRef) -> &[u8] {
        match *cell {
            CellRef::Borrowed { offset, len } => {
                let start = offset as usize;
                self.source
                    .get(start..start + len as usize)
                    .unwrap_or_default()
            }
            CellRef::Owned(ref slot) => self.arena.get(slot),
        }
    }

    pub fn cell(&self, row: Index, col: Index) -> Option<&[u8]> {
        let cell = self.columns.value(col)?.value(row)?;
        Some(self.resolve(cell))
    }

    pub fn cell_ref(&self, row: Index, col: Index) -> Option<CellRef> {
        self.columns.value(col)?.value(row).copied()
    }

    /// Present cells of one row in ascending column order.
    pub fn row(&self, row: Index) -> impl Iterator<Item = (Index, &[u8])> + '_ {
        self.columns
            .iter()
            .filter_map(move |(col, column)| column.value(row).map(|cell| (col, self.resolve(cell))))
    }

    /// Present cells of one column in ascending row order.
    pub fn column_iter(&self, col: Index) -> impl Iterator<Item = (Index, &[u8])> + '_ {
        self.columns
            .value(col)
            .into_iter()
            .flat_map(move |column| column.iter().map(move |(row, cell)| (row, self.resolve(cell))))
    }

    /// Indices of columns holding at least one cell.
    pub fn present_columns(&self) -> impl Iterator<Item = Index> + '_ {
        self.columns.keys()
    }

    /// Dense copy of the table, absent cells as `None`.
    ///
    /// Allocates `row_count * column_count` entries whatever the number of
    /// present cells, so it is only meant for small tables and tests. Use
    /// [`SparseTable::row`] or [`SparseTable::column_iter`] on sparse data.
    pub fn to_rows(&self) -> Vec<Vec<Option<Vec<u8>>>> {
        let mut rows = vec![vec![None; self.column_count as usize]; self.row_count as usize];
        for (col, column) in self.columns.iter() {
            for (row, cell) in column.iter() {
                rows[row as usize][col as usize] = Some(self.resolve(cell).to_vec());
            }
        }
        rows
    }

    fn column_mut(&mut self, col: Index) -> Option<&mut Column> {
        if !self.columns.contains_key(col) {
            let column = BlockIndexMap::with_block_size(self.index_block_size).with_max_key(self.max_row);
            if !self.columns.set(col, column) {
                return None;
            }
        }
        self.columns.value_mut(col)
    }

    #[inline]
    fn note_cell(&mut self, row: Index, col: Index) {
        self.row_count = self.row_count.max(row as u64 + 1);
        self.column_count = self.column_count.max(col as u64 + 1);
    }

    /// Mark `row` as present even if it holds no cells.
    pub fn touch_row(&mut self, row: Index) -> bool {
        if row > self.max_row {
            return false;
        }
        self.row_count = self.row_count.max(row as u64 + 1);
        true
    }

    /// Write `bytes` at `(row, col)`.
    ///
    /// Returns `Ok(false)` when the position is beyond the table bounds, or
    /// when the bytes exceed the arena block size and exceptions are off.
    ///
    /// Content that fits the cell's current slot is written in place. Larger
    /// content gets a new slot and the old bytes stay in the arena until
    /// [`SparseTable::compact`] or [`SparseTable::clear`].
    pub fn set_element(&mut self, row: Index, col: Index, bytes: &[u8]) -> Result<bool> {
        if row > self.max_row || col > self.max_column {
            return Ok(false);
        }
        let block_size = self.arena.block_size();
        if bytes.len() > block_size {
            if self.allow_block_size_exceptions {
                return Err(Error::BlockSizeExceeded {
                    len: bytes.len(),
                    block_size,
                });
            }
            return Ok(false);
        }

        if let Some(CellRef::Owned(slot)) = self.columns.value_mut(col).and_then(|c| c.value_mut(row)) {
            if self.arena.overwrite(slot, bytes) {
                return Ok(true);
            }
        }

        // Fresh slot; promotes borrowed cells and outgrown owned ones
        let Some(slot) = self.arena.alloc(bytes) else {
            return Ok(false);
        };
        let Some(column) = self.column_mut(col) else {
            return Ok(false);
        };
        column.set(row, CellRef::Owned(slot));
        self.note_cell(row, col);
        Ok(true)
    }

    /// Record a cell that borrows `len` bytes at `offset` of the source.
    pub(crate) fn store_borrowed(&mut self, row: Index, col: Index, offset: usize, len: usize) -> bool {
        if row > self.max_row || col > self.max_column || offset + len > self.source.len() {
            return false;
        }
        let cell = CellRef::Borrowed {
            offset: offset as u32,
            len: len as u32,
        };
        let Some(column) = self.column_mut(col) else {
            return false;
        };
        column.set(row, cell);
        self.note_cell(row, col);
        true
    }

    pub fn remove_element(&mut self, row: Index, col: Index) -> bool {
        let Some(column) = self.columns.value_mut(col) else {
            return false;
        };
        let removed = column.remove(row).is_some();
        if column.is_empty() {
            self.columns.remove(col);
        }
        removed
    }

    /// Shift rows at and after `pos` down by `count`.
    pub fn insert_rows(&mut self, pos: Index, count: Index) {
        if count == 0 || pos as u64 >= self.row_count {
            return;
        }
        for (_, column) in self.columns.iter_mut() {
            column.insert_keys(pos, count);
        }
        self.drop_empty_columns();
        self.row_count = (self.row_count + count as u64).min(self.max_row as u64 + 1);
    }

    pub fn remove_rows(&mut self, pos: Index, count: Index) {
        if count == 0 || pos as u64 >= self.row_count {
            return;
        }
        for (_, column) in self.columns.iter_mut() {
            column.remove_keys(pos, count);
        }
        self.drop_empty_columns();
        let removed = (count as u64).min(self.row_count - pos as u64);
        self.row_count -= removed;
    }

    pub fn insert_columns(&mut self, pos: Index, count: Index) {
        if count == 0 || pos as u64 >= self.column_count {
            return;
        }
        self.columns.insert_keys(pos, count);
        self.column_count = (self.column_count + count as u64).min(self.max_column as u64 + 1);
    }

    pub fn remove_columns(&mut self, pos: Index, count: Index) {
        if count == 0 || pos as u64 >= self.column_count {
            return;
        }
        self.columns.remove_keys(pos, count);
        let removed = (count as u64).min(self.column_count - pos as u64);
        self.column_count -= removed;
    }

    fn drop_empty_columns(&mut self) {
        let empty: Vec<Index> = self
            .columns
            .iter()
            .filter(|(_, column)| column.is_empty())
            .map(|(col, _)| col)
            .collect();
        for col in empty {
            self.columns.remove(col);
        }
    }

    /// Move row keys through `map`, which must be a bijection on the present
    /// rows below `row_count`.
    pub(crate) fn remap_rows(&mut self, map: impl Fn(Index) -> Index) {
        let block_size = self.index_block_size;
        let max_row = self.max_row;
        for (_, column) in self.columns.iter_mut() {
            let old = std::mem::replace(
                column,
                BlockIndexMap::with_block_size(block_size).with_max_key(max_row),
            );
            for (row, cell) in old.into_entries() {
                column.set(map(row), cell);
            }
        }
    }

    /// Append the rows of `other` with their indices shifted by `row_offset`.
    ///
    /// Tables sharing one source buffer move their blocks without copying
    /// cell bytes. Otherwise borrowed cells of `other` are copied in. Cells
    /// shifted past `max_row` are dropped, and only columns that keep at
    /// least one cell count towards `column_count`.
    pub fn append_rows(&mut self, mut other: SparseTable, row_offset: u64) -> Result<()> {
        if other.row_count == 0 {
            return Ok(());
        }
        let shifted_rows = row_offset + other.row_count;
        let same_source = self.source.as_ptr() == other.source.as_ptr()
            && self.source.len() == other.source.len();

        if !same_source {
            for (col, column) in other.columns.iter() {
                for (row, cell) in column.iter() {
                    let row = row as u64 + row_offset;
                    if row <= self.max_row as u64 {
                        let bytes = other.resolve(cell);
                        self.set_element(row as Index, col, bytes)?;
                    }
                }
            }
        } else {
            let base = self.arena.append(std::mem::take(&mut other.arena));
            let columns = std::mem::take(&mut other.columns);
            for (col, mut column) in columns.into_entries() {
                let Some(front) = column.front_key() else {
                    continue;
                };
                if col > self.max_column || front as u64 + row_offset > self.max_row as u64 {
                    continue;
                }
                if base > 0 {
                    for (_, cell) in column.iter_mut() {
                        if let CellRef::Owned(slot) = cell {
                            slot.chunk += base;
                        }
                    }
                }
                if let Some(target) = self.column_mut(col) {
                    target.append_shifted(column, row_offset);
                    self.column_count = self.column_count.max(col as u64 + 1);
                }
            }
        }

        self.row_count = self.row_count.max(shifted_rows.min(self.max_row as u64 + 1));
        Ok(())
    }

    /// Copy every owned cell into a fresh arena, releasing the bytes of
    /// outgrown and removed cells. Borrowed cells are untouched.
    pub fn compact(&mut self) {
        let block_size = self.arena.block_size();
        let old = std::mem::replace(&mut self.arena, Arena::new(block_size));
        for (_, column) in self.columns.iter_mut() {
            for (_, cell) in column.iter_mut() {
                if let CellRef::Owned(slot) = cell {
                    // Live slots never exceed the block size
                    if let Some(moved) = self.arena.alloc(old.get(slot)) {
                        *slot = moved;
                    }
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.columns.clear();
        self.arena.clear();
        self.row_count = 0;
        self.column_count = 0;
    }
}

impl PartialEq for SparseTable {
    /// Tables are equal when their sizes and every cell's bytes match,
    /// regardless of where the bytes live.
    fn eq(&self, other: &Self) -> bool {
        if self.row_count != other.row_count
            || self.column_count != other.column_count
            || self.cell_count() != other.cell_count()
        {
            return false;
        }
        self.columns.iter().all(|(col, column)| {
            column
                .iter()
                .all(|(row, cell)| other.cell(row, col) == Some(self.resolve(cell)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_from(rows: &[&[&str]]) -> SparseTable {
        let mut table = SparseTable::new();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                table.set_element(r as Index, c as Index, cell.as_bytes()).unwrap();
            }
        }
        table
    }

    fn column(table: &SparseTable, col: Index) -> Vec<(Index, String)> {
        table
            .column_iter(col)
            .map(|(r, b)| (r, String::from_utf8_lossy(b).to_string()))
            .collect()
    }

    #[test]
    fn test_set_and_read() {
        let table = table_from(&[&["a", "b"], &["c"]]);
        assert_eq!(table.cell(0, 1), Some(&b"b"[..]));
        assert_eq!(table.cell(1, 1), None);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.cell_count(), 3);
        let row: Vec<_> = table.row(0).map(|(c, b)| (c, b.to_vec())).collect();
        assert_eq!(row, vec![(0, b"a".to_vec()), (1, b"b".to_vec())]);
    }

    #[test]
    fn test_overwrite_in_place_and_grow() {
        let mut table = SparseTable::new().with_arena_block_size(64);
        table.set_element(0, 0, b"long value").unwrap();
        let before = table.cell_ref(0, 0).unwrap();
        table.set_element(0, 0, b"short").unwrap();
        let after = table.cell_ref(0, 0).unwrap();
        match (before, after) {
            (CellRef::Owned(a), CellRef::Owned(b)) => assert_eq!(a.capacity(), b.capacity()),
            other => panic!("unexpected cell refs {other:?}"),
        }
        assert_eq!(table.cell(0, 0), Some(&b"short"[..]));

        table.set_element(0, 0, b"a much longer value").unwrap();
        assert_eq!(table.cell(0, 0), Some(&b"a much longer value"[..]));
    }

    #[test]
    fn test_borrowed_cell_promotes_on_write() {
        let mut table = SparseTable::new().with_source(Bytes::from_static(b"hello,world"));
        assert!(table.store_borrowed(0, 1, 6, 5));
        assert!(table.cell_ref(0, 1).unwrap().is_borrowed());
        assert_eq!(table.cell(0, 1), Some(&b"world"[..]));

        table.set_element(0, 1, b"there").unwrap();
        assert!(!table.cell_ref(0, 1).unwrap().is_borrowed());
        assert_eq!(table.cell(0, 1), Some(&b"there"[..]));
        // The source buffer is untouched
        assert_eq!(&table.source()[..], b"hello,world");
    }

    #[test]
    fn test_oversized_cell_per_flag() {
        let mut quiet = SparseTable::new().with_arena_block_size(4);
        assert!(!quiet.set_element(0, 0, b"12345").unwrap());
        assert_eq!(quiet.cell(0, 0), None);

        let mut strict = SparseTable::new()
            .with_arena_block_size(4)
            .with_block_size_exceptions(true);
        let err = strict.set_element(0, 0, b"12345").unwrap_err();
        assert!(matches!(err, Error::BlockSizeExceeded { len: 5, block_size: 4 }));
        assert!(strict.set_element(0, 0, b"1234").unwrap());
    }

    #[test]
    fn test_out_of_bounds_is_noop() {
        let mut table = SparseTable::new().with_max_indices(2, 2);
        assert!(!table.set_element(3, 0, b"x").unwrap());
        assert!(!table.set_element(0, 3, b"x").unwrap());
        assert!(table.set_element(2, 2, b"x").unwrap());
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn test_remove_element() {
        let mut table = table_from(&[&["a", "b"]]);
        assert!(table.remove_element(0, 1));
        assert!(!table.remove_element(0, 1));
        assert_eq!(table.present_columns().collect::<Vec<_>>(), vec![0]);
        // Sizes are explicit and do not shrink on removal
        assert_eq!(table.column_count(), 2);
    }

    #[test]
    fn test_insert_and_remove_rows() {
        let mut table = table_from(&[&["0"], &["1"], &["2"]]);
        table.insert_rows(1, 2);
        assert_eq!(table.row_count(), 5);
        assert_eq!(column(&table, 0), vec![(0, "0".into()), (3, "1".into()), (4, "2".into())]);
        table.remove_rows(1, 2);
        assert_eq!(column(&table, 0), vec![(0, "0".into()), (1, "1".into()), (2, "2".into())]);
        assert_eq!(table.row_count(), 3);

        table.remove_rows(1, 100);
        assert_eq!(table.row_count(), 1);
        assert_eq!(column(&table, 0), vec![(0, "0".into())]);
    }

    #[test]
    fn test_insert_and_remove_columns() {
        let mut table = table_from(&[&["a", "b", "c"]]);
        table.insert_columns(1, 1);
        assert_eq!(table.column_count(), 4);
        assert_eq!(table.cell(0, 1), None);
        assert_eq!(table.cell(0, 2), Some(&b"b"[..]));
        table.remove_columns(0, 2);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.cell(0, 0), Some(&b"b"[..]));
        assert_eq!(table.cell(0, 1), Some(&b"c"[..]));
    }

    #[test]
    fn test_touch_row_counts_empty_rows() {
        let mut table = SparseTable::new();
        table.touch_row(2);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.cell_count(), 0);
    }

    #[test]
    fn test_append_rows_shared_source() {
        let source = Bytes::from_static(b"a,b\nc,d\n");
        let mut first = SparseTable::new().with_source(source.clone());
        first.store_borrowed(0, 0, 0, 1);
        first.store_borrowed(0, 1, 2, 1);
        let mut second = SparseTable::new().with_source(source);
        second.store_borrowed(0, 0, 4, 1);
        second.set_element(0, 1, b"owned").unwrap();

        first.append_rows(second, 1).unwrap();
        assert_eq!(first.row_count(), 2);
        assert_eq!(first.cell(1, 0), Some(&b"c"[..]));
        assert_eq!(first.cell(1, 1), Some(&b"owned"[..]));
        assert_eq!(first.cell(0, 1), Some(&b"b"[..]));
    }

    #[test]
    fn test_append_rows_foreign_source_copies() {
        let mut first = table_from(&[&["x"]]);
        let mut second = SparseTable::new().with_source(Bytes::from_static(b"yz"));
        second.store_borrowed(0, 0, 0, 2);
        second.touch_row(1);
        first.append_rows(second, 1).unwrap();
        assert_eq!(first.row_count(), 3);
        assert_eq!(first.cell(1, 0), Some(&b"yz"[..]));
    }

    #[test]
    fn test_append_rows_past_max_row_adds_no_columns() {
        let source = Bytes::from_static(b"\n0,x\n");
        let mut first = SparseTable::new().with_source(source.clone()).with_max_indices(0, 5);
        first.touch_row(0);
        let mut second = SparseTable::new().with_source(source).with_max_indices(0, 5);
        second.store_borrowed(0, 0, 1, 1);
        second.store_borrowed(0, 1, 3, 1);

        first.append_rows(second, 1).unwrap();
        assert_eq!(first.row_count(), 1);
        assert_eq!(first.column_count(), 0);
        assert_eq!(first.present_columns().count(), 0);

        let mut copied = SparseTable::new().with_max_indices(0, 5);
        copied.touch_row(0);
        copied.append_rows(table_from(&[&["a", "b", "c"]]), 1).unwrap();
        assert_eq!(copied.column_count(), 0);
        assert_eq!(copied, first);
    }

    #[test]
    fn test_compact_reclaims_outgrown_cells() {
        let mut table = SparseTable::new().with_arena_block_size(64);
        table.set_element(0, 0, b"ab").unwrap();
        table.set_element(0, 0, b"abcdef").unwrap();
        table.set_element(1, 0, b"gone").unwrap();
        table.remove_element(1, 0);
        table.set_element(2, 1, b"x").unwrap();
        assert_eq!(table.arena_bytes(), 13);

        table.compact();
        assert_eq!(table.arena_bytes(), 7);
        assert_eq!(table.cell(0, 0), Some(&b"abcdef"[..]));
        assert_eq!(table.cell(2, 1), Some(&b"x"[..]));
        // Compacted slots still take in-place writes
        table.set_element(0, 0, b"abc").unwrap();
        assert_eq!(table.arena_bytes(), 7);
        assert_eq!(table.cell(0, 0), Some(&b"abc"[..]));
    }

    #[test]
    fn test_equality_ignores_storage() {
        let source = Bytes::from_static(b"abc");
        let mut borrowed = SparseTable::new().with_source(source);
        borrowed.store_borrowed(0, 0, 0, 3);
        let owned = table_from(&[&["abc"]]);
        assert_eq!(borrowed, owned);
        assert_ne!(owned, table_from(&[&["abd"]]));
    }

    #[test]
    fn test_to_rows_and_clear() {
        let mut table = table_from(&[&["a", ""], &[]]);
        table.touch_row(1);
        assert_eq!(
            table.to_rows(),
            vec![vec![Some(b"a".to_vec()), Some(Vec::new())], vec![None, None]]
        );
        table.clear();
        assert_eq!(table.row_count(), 0);
        assert!(table.to_rows().is_empty());
    }
}
