// Sparse storage: block-indexed maps, the cell arena and the table on top

pub mod arena;
pub mod block_map;
pub mod sort;
pub mod table;

pub use arena::{Arena, ArenaSlot, DEFAULT_ARENA_BLOCK_SIZE};
pub use block_map::{BlockIndexMap, DEFAULT_BLOCK_SIZE};
pub use table::{CellRef, Column, SparseTable};
