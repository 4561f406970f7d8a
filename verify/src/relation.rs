//! Interfaces of the catalog and block provider the driver runs against.
//!
//! The server implements them on top of the relation cache and the buffer
//! manager, the offline catalog on top of in-memory blocks or segment
//! files.

use anyhow::{bail, Result};
use common::CheckError;
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;
use storage::attr::TupleDesc;
use storage::{BlockNumber, MAX_BLOCK_NUMBER};

pub type Oid = u32;

/// Index oids of a table, most tables have only a few.
pub type IndexList = SmallVec<[Oid; 4]>;

/// `pg_class.relkind`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelKind {
    Table,
    ToastTable,
    Index,
    Other(u8),
}

impl RelKind {
    pub fn from_relkind(relkind: u8) -> Self {
        match relkind {
            b'r' => RelKind::Table,
            b't' => RelKind::ToastTable,
            b'i' => RelKind::Index,
            other => RelKind::Other(other),
        }
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self, RelKind::Table | RelKind::ToastTable)
    }
}

/// Access method of a relation, known built-in oids are named.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMethod {
    Heap,
    Btree,
    Hash,
    Gist,
    Gin,
    Spgist,
    Brin,
    Other(Oid),
}

impl AccessMethod {
    pub fn from_oid(oid: Oid) -> Self {
        match oid {
            2 => AccessMethod::Heap,
            403 => AccessMethod::Btree,
            405 => AccessMethod::Hash,
            783 => AccessMethod::Gist,
            2742 => AccessMethod::Gin,
            4000 => AccessMethod::Spgist,
            3580 => AccessMethod::Brin,
            other => AccessMethod::Other(other),
        }
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMethod::Heap => f.write_str("heap"),
            AccessMethod::Btree => f.write_str("btree"),
            AccessMethod::Hash => f.write_str("hash"),
            AccessMethod::Gist => f.write_str("gist"),
            AccessMethod::Gin => f.write_str("gin"),
            AccessMethod::Spgist => f.write_str("spgist"),
            AccessMethod::Brin => f.write_str("brin"),
            AccessMethod::Other(oid) => write!(f, "am {oid}"),
        }
    }
}

/// Relation-level lock held for the duration of a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    AccessShare,
    /// Excludes concurrent writers, needed for a consistent cross-check.
    ShareRowExclusive,
}

/// An open relation. Dropping the handle closes the relation and releases
/// the lock it was opened with.
pub trait Relation {
    fn name(&self) -> &str;
    fn kind(&self) -> RelKind;
    fn access_method(&self) -> AccessMethod;
    fn tuple_desc(&self) -> &TupleDesc;
    /// Number of blocks in the main fork.
    fn nblocks(&self) -> Result<BlockNumber>;
    /// Copy block `block` into `buf` (`BLCKSZ` bytes) under a share lock.
    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()>;
    fn index_oids(&self) -> Result<IndexList>;
}

pub trait Catalog {
    type Rel<'a>: Relation
    where
        Self: 'a;

    fn is_superuser(&self) -> bool;
    fn open(&self, oid: Oid, mode: LockMode) -> Result<Self::Rel<'_>>;
}

/// Explicit half-open block range `[from, to)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub from: BlockNumber,
    pub to: BlockNumber,
}

fn block_arg(name: &'static str, value: i64) -> Result<BlockNumber> {
    if !(0..=MAX_BLOCK_NUMBER as i64).contains(&value) {
        bail!(CheckError::InvalidBlockNumber(name, value));
    }
    Ok(value as BlockNumber)
}

impl BlockRange {
    /// Validate SQL-level `int8` arguments.
    pub fn from_args(from: i64, to: i64) -> Result<Self> {
        Ok(Self {
            from: block_arg("starting", from)?,
            to: block_arg("ending", to)?,
        })
    }

    /// Blocks to visit in a relation of `nblocks` blocks.
    pub fn clamp(&self, nblocks: BlockNumber) -> Range<BlockNumber> {
        let to = self.to.min(nblocks);
        self.from.min(to)..to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_range_arguments() {
        assert_eq!(
            BlockRange::from_args(2, 5).unwrap(),
            BlockRange { from: 2, to: 5 }
        );
        let err = BlockRange::from_args(-1, 5).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::InvalidBlockNumber("starting", -1))
        ));
        let err = BlockRange::from_args(0, 0x1_0000_0000).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::InvalidBlockNumber("ending", _))
        ));
    }

    #[test]
    fn clamp_to_relation() {
        let range = BlockRange { from: 2, to: 100 };
        assert_eq!(range.clamp(10), 2..10);
        assert_eq!(range.clamp(1), 1..1);
        assert!(BlockRange { from: 5, to: 3 }.clamp(10).is_empty());
    }

    #[test]
    fn relkind_codes() {
        assert!(RelKind::from_relkind(b'r').is_table());
        assert!(RelKind::from_relkind(b't').is_table());
        assert!(!RelKind::from_relkind(b'i').is_table());
        assert_eq!(RelKind::from_relkind(b'v'), RelKind::Other(b'v'));
        assert_eq!(AccessMethod::from_oid(403), AccessMethod::Btree);
    }
}
