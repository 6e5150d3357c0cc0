//! Relation files: binary, memory-mapped, column-major tuple stores.
//!
//! Layout: an 8-byte little-endian tuple count, an 8-byte little-endian column
//! count, then `num_columns` blocks of `num_tuples * 8` bytes each — column
//! `c`'s values, row-major within the column, each a little-endian `u64`.
//!
//! The file is mapped read-only and values are decoded on access rather than
//! reinterpret-cast the way the reference loader does; this sidesteps strict
//! aliasing hazards the original sidesteps with a `-fno-strict-aliasing` build
//! flag instead.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{DbError, Result};

/// A single row-id/payload pair. Represents `(row_id, column_value)` while
/// building a join's input, and `(row_id_in_R, row_id_in_S)` in a join result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tuple {
    pub key: u32,
    pub payload: u32,
}

/// Materialized join input/output: a flat vector of tuples, never backed by a
/// relation's own memory-mapped columns once built.
#[derive(Debug, Clone, Default)]
pub struct JoinRelation {
    pub tuples: Vec<Tuple>,
}

impl JoinRelation {
    pub fn new(tuples: Vec<Tuple>) -> Self {
        Self { tuples }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

const HEADER_BYTES: usize = 16;

/// A memory-mapped, column-major relation.
pub struct Relation {
    mmap: Mmap,
    num_tuples: u64,
    num_columns: u64,
}

impl Relation {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() <= HEADER_BYTES {
            return Err(DbError::RelationFormat(format!(
                "{}: file too small to contain a valid header ({} bytes)",
                path.display(),
                mmap.len()
            )));
        }

        let num_tuples = u64::from_le_bytes(mmap[0..8].try_into().unwrap());
        let num_columns = u64::from_le_bytes(mmap[8..16].try_into().unwrap());

        let expected_len = HEADER_BYTES as u64 + num_tuples * num_columns * 8;
        if (mmap.len() as u64) < expected_len {
            return Err(DbError::RelationFormat(format!(
                "{}: expected at least {expected_len} bytes for {num_tuples} tuples x \
                 {num_columns} columns, found {}",
                path.display(),
                mmap.len()
            )));
        }

        Ok(Self {
            mmap,
            num_tuples,
            num_columns,
        })
    }

    pub fn num_tuples(&self) -> u64 {
        self.num_tuples
    }

    pub fn num_columns(&self) -> u64 {
        self.num_columns
    }

    /// Reads column `column`'s value at `row`.
    pub fn value(&self, column: u64, row: u32) -> u64 {
        let bytes_per_column = self.num_tuples * 8;
        let offset = HEADER_BYTES as u64 + column * bytes_per_column + row as u64 * 8;
        let offset = offset as usize;
        u64::from_le_bytes(self.mmap[offset..offset + 8].try_into().unwrap())
    }

    /// Iterates every value of `column`, row 0 first.
    pub fn column_iter(&self, column: u64) -> impl Iterator<Item = u64> + '_ {
        let bytes_per_column = self.num_tuples * 8;
        let start = HEADER_BYTES as u64 + column * bytes_per_column;
        let slice = &self.mmap[start as usize..(start + bytes_per_column) as usize];
        slice
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_relation(tuples: &[&[u64]]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let num_tuples = tuples[0].len() as u64;
        let num_columns = tuples.len() as u64;
        file.write_all(&num_tuples.to_le_bytes()).unwrap();
        file.write_all(&num_columns.to_le_bytes()).unwrap();
        for column in tuples {
            for value in *column {
                file.write_all(&value.to_le_bytes()).unwrap();
            }
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_header_and_values() {
        let file = write_relation(&[&[10, 20, 30], &[1, 2, 3]]);
        let relation = Relation::load(file.path()).unwrap();

        assert_eq!(relation.num_tuples(), 3);
        assert_eq!(relation.num_columns(), 2);
        assert_eq!(relation.value(0, 1), 20);
        assert_eq!(relation.value(1, 2), 3);
    }

    #[test]
    fn column_iter_yields_all_rows_in_order() {
        let file = write_relation(&[&[5, 6, 7, 8]]);
        let relation = Relation::load(file.path()).unwrap();

        let values: Vec<u64> = relation.column_iter(0).collect();
        assert_eq!(values, vec![5, 6, 7, 8]);
    }

    #[test]
    fn rejects_truncated_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&3u64.to_le_bytes()).unwrap();
        file.write_all(&1u64.to_le_bytes()).unwrap();
        file.write_all(&1u64.to_le_bytes()).unwrap();
        file.flush().unwrap();

        assert!(Relation::load(file.path()).is_err());
    }
}
