// Writing a table back out as delimited text
//
// Rows are assembled in a flat buffer in the table's byte form (source bytes,
// or UTF-8 for wide encodings) and flushed through the target encoding in
// row-aligned chunks.
//
// Quoting rules:
//   * a cell is enclosed when it contains the separator, the enclosing char
//     or the dialect's row terminator; enclosing chars inside are doubled
//   * a bare CR or LF that is not the row terminator reads back as data and
//     is written raw
//   * a row whose only cell is an empty column 0 is written as an enclosed
//     empty cell, so it reads back as a cell rather than an empty line
//   * with enclosing disabled cells are written raw

use std::io::Write;

use memchr::{memchr, memchr2, memmem};

use crate::core::encoding::encode_extend;
use crate::core::newlines::Eol;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::storage::table::SparseTable;
use crate::Index;

/// Buffered bytes after which a chunk is encoded and written.
const FLUSH_THRESHOLD: usize = 64 * 1024;

// ==========================================================================
// Quoting: wrap field in enclosing chars, double internal ones
// ==========================================================================

/// Write a field that needs quoting: enclosing + field with doubled enclosing + enclosing
#[inline]
pub fn write_quoted_field(out: &mut Vec<u8>, field: &[u8], enclosing: u8) {
    out.push(enclosing);
    let mut rest = field;
    while let Some(i) = memchr(enclosing, rest) {
        out.extend_from_slice(&rest[..=i]);
        out.push(enclosing);
        rest = &rest[i + 1..];
    }
    out.extend_from_slice(rest);
    out.push(enclosing);
}

/// Check if a field must be enclosed to read back unchanged.
#[inline]
pub fn field_needs_quoting(field: &[u8], separator: Option<u8>, enclosing: u8, eol: Eol) -> bool {
    let special = match separator {
        Some(sep) => memchr2(sep, enclosing, field),
        None => memchr(enclosing, field),
    };
    special.is_some() || memmem::find(field, eol.as_bytes()).is_some()
}

/// Append one row (present cells in ascending column order) to `out`.
pub fn write_row<'a>(
    out: &mut Vec<u8>,
    cells: impl IntoIterator<Item = (Index, &'a [u8])>,
    dialect: &Dialect,
) {
    let mut next_col: Index = 0;
    let mut only_empty_first = None;

    for (col, bytes) in cells {
        if col == 0 {
            only_empty_first = Some(bytes.is_empty());
        } else {
            only_empty_first = Some(false);
        }
        while next_col < col {
            if let Some(sep) = dialect.separator {
                out.push(sep);
            }
            next_col += 1;
        }
        if col > 0 {
            if let Some(sep) = dialect.separator {
                out.push(sep);
            }
        }
        match dialect.enclosing {
            Some(enc) if field_needs_quoting(bytes, dialect.separator, enc, dialect.eol) => {
                write_quoted_field(out, bytes, enc)
            }
            _ => out.extend_from_slice(bytes),
        }
        next_col = col + 1;
    }

    if only_empty_first == Some(true) {
        if let Some(enc) = dialect.enclosing {
            out.push(enc);
            out.push(enc);
        }
    }
    out.extend_from_slice(dialect.eol.as_bytes());
}

/// Write `table` as delimited text in `dialect`, BOM first when requested.
pub fn write_table<W: Write>(table: &SparseTable, dialect: &Dialect, out: &mut W) -> Result<()> {
    let mut encoded = Vec::new();
    if dialect.bom_writing {
        if let Some(bom) = dialect.encoding.bom() {
            out.write_all(bom)?;
        }
    }

    let mut buf = Vec::with_capacity(FLUSH_THRESHOLD + 1024);
    for row in 0..table.row_count() {
        write_row(&mut buf, table.row(row as Index), dialect);
        if buf.len() >= FLUSH_THRESHOLD {
            flush_chunk(out, &mut buf, &mut encoded, dialect)?;
        }
    }
    flush_chunk(out, &mut buf, &mut encoded, dialect)?;
    out.flush()?;
    Ok(())
}

fn flush_chunk<W: Write>(
    out: &mut W,
    buf: &mut Vec<u8>,
    encoded: &mut Vec<u8>,
    dialect: &Dialect,
) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    if dialect.encoding.is_wide() {
        encoded.clear();
        encode_extend(encoded, buf, dialect.encoding);
        out.write_all(encoded)?;
    } else {
        out.write_all(buf)?;
    }
    buf.clear();
    Ok(())
}

/// Serialize `table` into a new buffer.
pub fn table_to_bytes(table: &SparseTable, dialect: &Dialect) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_table(table, dialect, &mut out)?;
    Ok(out)
}
