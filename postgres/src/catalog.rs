//! Relation cache and buffer manager behind the `verify` catalog traits.

use anyhow::{bail, Result};
use common::CheckError;
use pgrx::pg_sys;
use pgrx::{PgList, PgTupleDesc};
use smol_str::SmolStr;
use std::marker::PhantomData;
use std::ptr;
use storage::attr::{Align, AttrMeta, TupleDesc};
use storage::{BlockNumber, BLCKSZ};
use verify::relation::{AccessMethod, Catalog, IndexList, LockMode, Oid, RelKind, Relation};

fn lockmode(mode: LockMode) -> pg_sys::LOCKMODE {
    match mode {
        LockMode::AccessShare => pg_sys::AccessShareLock as pg_sys::LOCKMODE,
        LockMode::ShareRowExclusive => pg_sys::ShareRowExclusiveLock as pg_sys::LOCKMODE,
    }
}

/// Catalog of the current database. Blocks are read through a bulk-read
/// ring so a scan does not evict the whole shared buffer pool.
pub(crate) struct PgCatalog {
    strategy: pg_sys::BufferAccessStrategy,
}

impl PgCatalog {
    pub(crate) fn new() -> Self {
        let strategy = unsafe {
            pg_sys::GetAccessStrategy(pg_sys::BufferAccessStrategyType::BAS_BULKREAD)
        };
        Self { strategy }
    }
}

impl Drop for PgCatalog {
    fn drop(&mut self) {
        unsafe { pg_sys::FreeAccessStrategy(self.strategy) }
    }
}

impl Catalog for PgCatalog {
    type Rel<'a> = PgRelation<'a>;

    fn is_superuser(&self) -> bool {
        unsafe { pg_sys::superuser() }
    }

    fn open(&self, oid: Oid, mode: LockMode) -> Result<PgRelation<'_>> {
        let lockmode = lockmode(mode);
        // raises ERROR for a missing relation
        let rel = unsafe { pg_sys::relation_open(pg_sys::Oid::from(oid), lockmode) };
        let (name, kind, am, desc) = unsafe {
            let class = &*(*rel).rd_rel;
            (
                SmolStr::new(pgrx::name_data_to_str(&class.relname)),
                RelKind::from_relkind(class.relkind as u8),
                AccessMethod::from_oid(class.relam.as_u32()),
                tuple_desc((*rel).rd_att),
            )
        };
        Ok(PgRelation {
            rel,
            lockmode,
            name,
            kind,
            am,
            desc,
            strategy: self.strategy,
            _catalog: PhantomData,
        })
    }
}

/// Dropped columns are kept, their storage is still on disk.
unsafe fn tuple_desc(att: pg_sys::TupleDesc) -> TupleDesc {
    let att = PgTupleDesc::from_pg_unchecked(att);
    let attrs = att
        .iter()
        .map(|attr| AttrMeta {
            name: SmolStr::new(attr.name()),
            attlen: attr.attlen,
            attbyval: attr.attbyval,
            attalign: Align::from(attr.attalign as u8),
        })
        .collect();
    TupleDesc::new(attrs)
}

pub(crate) struct PgRelation<'a> {
    rel: pg_sys::Relation,
    lockmode: pg_sys::LOCKMODE,
    name: SmolStr,
    kind: RelKind,
    am: AccessMethod,
    desc: TupleDesc,
    strategy: pg_sys::BufferAccessStrategy,
    _catalog: PhantomData<&'a PgCatalog>,
}

impl Relation for PgRelation<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RelKind {
        self.kind
    }

    fn access_method(&self) -> AccessMethod {
        self.am
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn nblocks(&self) -> Result<BlockNumber> {
        Ok(unsafe {
            pg_sys::RelationGetNumberOfBlocksInFork(self.rel, pg_sys::ForkNumber::MAIN_FORKNUM)
        })
    }

    fn read_block(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        if buf.len() < BLCKSZ {
            bail!(CheckError::BufferTooSmall(buf.len()));
        }
        pgrx::check_for_interrupts!();
        unsafe {
            let buffer = pg_sys::ReadBufferExtended(
                self.rel,
                pg_sys::ForkNumber::MAIN_FORKNUM,
                block,
                pg_sys::ReadBufferMode::RBM_NORMAL,
                self.strategy,
            );
            pg_sys::LockBuffer(buffer, pg_sys::BUFFER_LOCK_SHARE as i32);
            let page = pg_sys::BufferGetPage(buffer) as *const u8;
            ptr::copy_nonoverlapping(page, buf.as_mut_ptr(), BLCKSZ);
            pg_sys::UnlockReleaseBuffer(buffer);
        }
        Ok(())
    }

    fn index_oids(&self) -> Result<IndexList> {
        unsafe {
            let list = pg_sys::RelationGetIndexList(self.rel);
            let oids = PgList::<pg_sys::Oid>::from_pg(list);
            let indexes = (0..oids.len())
                .filter_map(|i| oids.get_oid(i))
                .map(|oid| oid.as_u32())
                .collect();
            pg_sys::list_free(list);
            Ok(indexes)
        }
    }
}

impl Drop for PgRelation<'_> {
    fn drop(&mut self) {
        unsafe { pg_sys::relation_close(self.rel, self.lockmode) }
    }
}
