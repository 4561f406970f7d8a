//! Catalog over relations that live outside a running server: blocks kept
//! in memory, or the segment files of a copied data directory.

use crate::relation::{AccessMethod, Catalog, IndexList, LockMode, Oid, RelKind, Relation};
use ahash::AHashMap;
use anyhow::{bail, Result};
use common::CheckError;
use smallvec::SmallVec;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use storage::attr::TupleDesc;
use storage::{BlockNumber, BLCKSZ};
use tracing::trace;

/// Blocks per segment file of a relation fork.
pub const RELSEG_SIZE: BlockNumber = 131072;

type HeldLocks = SmallVec<[LockMode; 2]>;

/// Where the blocks of a relation come from.
#[derive(Debug)]
pub enum BlockStore {
    Memory(Vec<Vec<u8>>),
    /// Path of the first segment, `<path>.1`, `<path>.2`, ... follow.
    SegmentedFile(PathBuf),
}

fn segment_path(base: &Path, segno: u32) -> PathBuf {
    if segno == 0 {
        return base.to_path_buf();
    }
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{segno}"));
    PathBuf::from(name)
}

fn io_error(action: String, err: std::io::Error) -> CheckError {
    CheckError::FailedTo(action.into(), SmolStr::new(err.to_string()))
}

impl BlockStore {
    fn nblocks(&self) -> Result<BlockNumber> {
        let base = match self {
            BlockStore::Memory(blocks) => return Ok(blocks.len() as BlockNumber),
            BlockStore::SegmentedFile(base) => base,
        };
        let mut total: BlockNumber = 0;
        for segno in 0.. {
            let path = segment_path(base, segno);
            let len = match std::fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(err) if segno > 0 && err.kind() == std::io::ErrorKind::NotFound => break,
                Err(err) => bail!(io_error(format!("stat \"{}\"", path.display()), err)),
            };
            let blocks = (len / BLCKSZ as u64) as BlockNumber;
            total = total.saturating_add(blocks);
            // Only a full segment can be followed by another one.
            if blocks < RELSEG_SIZE {
                break;
            }
        }
        Ok(total)
    }

    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        if buf.len() < BLCKSZ {
            bail!(CheckError::BufferTooSmall(buf.len()));
        }
        let buf = &mut buf[..BLCKSZ];
        match self {
            BlockStore::Memory(blocks) => {
                let Some(page) = blocks.get(block as usize) else {
                    bail!(CheckError::FailedTo(
                        "read block".into(),
                        format!("block {block} is past the end of the relation").into()
                    ));
                };
                if page.len() < BLCKSZ {
                    bail!(CheckError::BufferTooSmall(page.len()));
                }
                buf.copy_from_slice(&page[..BLCKSZ]);
            }
            BlockStore::SegmentedFile(base) => {
                let path = segment_path(base, block / RELSEG_SIZE);
                let pos = (block % RELSEG_SIZE) as u64 * BLCKSZ as u64;
                let action = || format!("read block {block} of \"{}\"", path.display());
                let mut file = File::open(&path).map_err(|err| io_error(action(), err))?;
                file.seek(SeekFrom::Start(pos))
                    .map_err(|err| io_error(action(), err))?;
                file.read_exact(buf).map_err(|err| io_error(action(), err))?;
            }
        }
        trace!("read block {block}");
        Ok(())
    }
}

#[derive(Debug)]
struct RelationEntry {
    name: SmolStr,
    kind: RelKind,
    am: AccessMethod,
    desc: TupleDesc,
    store: BlockStore,
    indexes: IndexList,
}

/// In-memory catalog. Locks are only recorded, there is nobody to conflict
/// with, but they let callers observe that every scan releases them.
#[derive(Debug)]
pub struct StaticCatalog {
    relations: AHashMap<Oid, RelationEntry>,
    superuser: bool,
    locks: RefCell<AHashMap<Oid, HeldLocks>>,
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            relations: AHashMap::new(),
            superuser: true,
            locks: RefCell::new(AHashMap::new()),
        }
    }

    pub fn set_superuser(&mut self, superuser: bool) -> &mut Self {
        self.superuser = superuser;
        self
    }

    pub fn add_table(
        &mut self,
        oid: Oid,
        name: &str,
        desc: TupleDesc,
        store: BlockStore,
    ) -> &mut Self {
        self.add_relation(oid, name, RelKind::Table, AccessMethod::Heap, desc, store)
    }

    /// Register an index of table `table`.
    pub fn add_index(
        &mut self,
        oid: Oid,
        name: &str,
        table: Oid,
        am: AccessMethod,
        desc: TupleDesc,
        store: BlockStore,
    ) -> Result<&mut Self> {
        let Some(entry) = self.relations.get_mut(&table) else {
            bail!(CheckError::NotFound("table".into(), table.to_string().into()));
        };
        entry.indexes.push(oid);
        Ok(self.add_relation(oid, name, RelKind::Index, am, desc, store))
    }

    /// Register a relation of any kind, e.g. a view or a TOAST table.
    pub fn add_relation(
        &mut self,
        oid: Oid,
        name: &str,
        kind: RelKind,
        am: AccessMethod,
        desc: TupleDesc,
        store: BlockStore,
    ) -> &mut Self {
        self.relations.insert(
            oid,
            RelationEntry {
                name: SmolStr::new(name),
                kind,
                am,
                desc,
                store,
                indexes: IndexList::new(),
            },
        );
        self
    }

    /// Locks currently held on `oid`.
    pub fn held_locks(&self, oid: Oid) -> Vec<LockMode> {
        self.locks
            .borrow()
            .get(&oid)
            .map(|held| held.to_vec())
            .unwrap_or_default()
    }

    fn release(&self, oid: Oid, mode: LockMode) {
        let mut locks = self.locks.borrow_mut();
        if let Some(held) = locks.get_mut(&oid) {
            if let Some(pos) = held.iter().position(|m| *m == mode) {
                held.remove(pos);
            }
            if held.is_empty() {
                locks.remove(&oid);
            }
        }
    }
}

impl Catalog for StaticCatalog {
    type Rel<'a> = OfflineRelation<'a>;

    fn is_superuser(&self) -> bool {
        self.superuser
    }

    fn open(&self, oid: Oid, mode: LockMode) -> Result<OfflineRelation<'_>> {
        let Some(entry) = self.relations.get(&oid) else {
            bail!(CheckError::NotFound("relation".into(), oid.to_string().into()));
        };
        self.locks.borrow_mut().entry(oid).or_default().push(mode);
        trace!("opened relation \"{}\" with {mode:?}", entry.name);
        Ok(OfflineRelation {
            catalog: self,
            oid,
            mode,
            entry,
        })
    }
}

/// Open relation of a `StaticCatalog`, releases its lock on drop.
pub struct OfflineRelation<'a> {
    catalog: &'a StaticCatalog,
    oid: Oid,
    mode: LockMode,
    entry: &'a RelationEntry,
}

impl Relation for OfflineRelation<'_> {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn kind(&self) -> RelKind {
        self.entry.kind
    }

    fn access_method(&self) -> AccessMethod {
        self.entry.am
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.entry.desc
    }

    fn nblocks(&self) -> Result<BlockNumber> {
        self.entry.store.nblocks()
    }

    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        self.entry.store.read_block(block, buf)
    }

    fn index_oids(&self) -> Result<IndexList> {
        Ok(self.entry.indexes.clone())
    }
}

impl Drop for OfflineRelation<'_> {
    fn drop(&mut self) {
        self.catalog.release(self.oid, self.mode);
    }
}
