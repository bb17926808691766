// Ingestion and writing strategies

pub(crate) mod sink;

pub mod encode;
pub mod parallel;

pub use encode::{table_to_bytes, write_table};
pub use parallel::*;
