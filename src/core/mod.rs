// Core primitives for CSV tokenizing

pub mod encoding;
pub mod field;
pub mod newlines;
pub mod scanner;
pub mod tokenizer;

pub use encoding::*;
pub use field::CellData;
pub use newlines::*;
pub use scanner::{split_rows, split_targets, RowSplit};
pub use tokenizer::*;
