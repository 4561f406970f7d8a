//! Relation-level scans: pull blocks from the provider, run the page
//! checks, and cross-check a table against its indexes.

use crate::am;
use crate::bitmap::ItemBitmap;
use crate::config::CheckConfig;
use crate::header::check_header;
use crate::heap::check_heap_tuples;
use crate::relation::{BlockRange, Catalog, LockMode, Oid, RelKind, Relation};
use anyhow::{bail, Result};
use common::CheckError;
use storage::page::Page;
use storage::BLCKSZ;
use tracing::{debug, info, warn};

/// Options of a table scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableCheck {
    pub check_indexes: bool,
    pub cross_check: bool,
    pub range: Option<BlockRange>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub errors: u32,
    /// The access method filled the bitmap, it can be compared.
    pub cross_checked: bool,
}

fn require_superuser<C: Catalog>(catalog: &C) -> Result<()> {
    if !catalog.is_superuser() {
        bail!(CheckError::InsufficientPrivilege);
    }
    Ok(())
}

fn saturating_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Check a table and, on request, its indexes. The returned count is the
/// number of violations found.
pub fn scan_table<C: Catalog>(
    catalog: &C,
    config: &CheckConfig,
    relid: Oid,
    opts: TableCheck,
) -> Result<u32> {
    require_superuser(catalog)?;

    if opts.range.is_some() && (opts.check_indexes || opts.cross_check) {
        bail!(CheckError::RangeWithIndexes);
    }

    let mode = if opts.cross_check {
        LockMode::ShareRowExclusive
    } else {
        LockMode::AccessShare
    };
    let rel = catalog.open(relid, mode)?;

    if !rel.kind().is_table() {
        bail!(CheckError::WrongObjectType(rel.name().into(), "a table"));
    }

    let nblocks = rel.nblocks()?;
    let (blocks, mut bitmap_heap) = match opts.range {
        Some(range) => (range.clamp(nblocks), None),
        None => (0..nblocks, opts.cross_check.then(|| ItemBitmap::new(nblocks))),
    };

    debug!(
        "checking table \"{}\" blocks {}..{}",
        rel.name(),
        blocks.start,
        blocks.end
    );

    let desc = rel.tuple_desc();
    let mut buf = vec![0u8; BLCKSZ];
    let mut errors = 0u32;

    for block in blocks {
        rel.read_block(block, &mut buf)?;
        let page = Page::from_slice(&buf)?;

        let report = check_header(page.header(), block, config);
        errors = errors.saturating_add(report.errors);
        if report.is_final() {
            continue;
        }

        // a broken header only stops the tuple walk, the line pointers are
        // still collected for the cross-check
        if report.is_valid() {
            errors = errors.saturating_add(check_heap_tuples(desc, &page, block));
        }

        if let Some(bitmap) = bitmap_heap.as_mut() {
            errors = errors.saturating_add(bitmap.add_heap_items(&page, block));
        }
    }

    if let Some(bitmap) = bitmap_heap.as_ref() {
        if config.debug {
            info!("{}", bitmap.dump(config.bitmap_format));
        }
    }

    if opts.check_indexes {
        let mut bitmap_idx = bitmap_heap.as_ref().map(ItemBitmap::empty_copy);

        for index in rel.index_oids()? {
            if let Some(bitmap) = bitmap_idx.as_mut() {
                bitmap.reset();
            }

            let outcome = scan_index(catalog, config, index, None, bitmap_idx.as_mut())?;
            errors = errors.saturating_add(outcome.errors);

            let (Some(heap), Some(idx)) = (bitmap_heap.as_ref(), bitmap_idx.as_ref()) else {
                continue;
            };
            if !outcome.cross_checked {
                continue;
            }

            let ndiffs = ItemBitmap::compare(heap, idx)?;
            if config.debug {
                info!("{}", idx.dump(config.bitmap_format));
            }
            if ndiffs != 0 {
                warn!("there are {ndiffs} differences between the table and the index");
            }
            errors = errors.saturating_add(saturating_u32(ndiffs));
        }
    }

    Ok(errors)
}

/// Check an index with the page checker of its access method. With a
/// bitmap, the heap TIDs referenced from leaf pages are collected in it.
pub fn scan_index<C: Catalog>(
    catalog: &C,
    config: &CheckConfig,
    relid: Oid,
    range: Option<BlockRange>,
    mut bitmap: Option<&mut ItemBitmap>,
) -> Result<IndexOutcome> {
    require_superuser(catalog)?;

    let mode = if bitmap.is_some() {
        LockMode::ShareRowExclusive
    } else {
        LockMode::AccessShare
    };
    let rel = catalog.open(relid, mode)?;

    info!("checking index: {}", rel.name());

    if rel.kind() != RelKind::Index {
        bail!(CheckError::WrongObjectType(rel.name().into(), "an index"));
    }

    let checker = am::lookup(rel.access_method());
    debug!(
        "index \"{}\" uses the {} page checker ({})",
        rel.name(),
        checker.name,
        rel.access_method()
    );

    let nblocks = rel.nblocks()?;
    let blocks = match range {
        Some(range) => range.clamp(nblocks),
        None => 0..nblocks,
    };

    let desc = rel.tuple_desc();
    let mut buf = vec![0u8; BLCKSZ];
    let mut errors = 0u32;

    for block in blocks {
        rel.read_block(block, &mut buf)?;
        let page = Page::from_slice(&buf)?;
        let page_errors = (checker.check_page)(desc, &page, block, config, bitmap.as_deref_mut());
        errors = errors.saturating_add(page_errors);
    }

    Ok(IndexOutcome {
        errors,
        cross_checked: checker.cross_check,
    })
}

/// `pg_check_table(regclass, bool, bool)`
pub fn check_table<C: Catalog>(
    catalog: &C,
    config: &CheckConfig,
    relid: Oid,
    check_indexes: bool,
    cross_check: bool,
) -> Result<u32> {
    scan_table(
        catalog,
        config,
        relid,
        TableCheck {
            check_indexes,
            cross_check,
            range: None,
        },
    )
}

/// `pg_check_table_pages(regclass, int8, int8)`
pub fn check_table_pages<C: Catalog>(
    catalog: &C,
    config: &CheckConfig,
    relid: Oid,
    from: i64,
    to: i64,
) -> Result<u32> {
    let range = BlockRange::from_args(from, to)?;
    scan_table(
        catalog,
        config,
        relid,
        TableCheck {
            range: Some(range),
            ..Default::default()
        },
    )
}

/// `pg_check_index(regclass)`
pub fn check_index<C: Catalog>(catalog: &C, config: &CheckConfig, relid: Oid) -> Result<u32> {
    Ok(scan_index(catalog, config, relid, None, None)?.errors)
}

/// `pg_check_index_pages(regclass, int8, int8)`
pub fn check_index_pages<C: Catalog>(
    catalog: &C,
    config: &CheckConfig,
    relid: Oid,
    from: i64,
    to: i64,
) -> Result<u32> {
    let range = BlockRange::from_args(from, to)?;
    Ok(scan_index(catalog, config, relid, Some(range), None)?.errors)
}
