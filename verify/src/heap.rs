use crate::attribute::{walk_attributes, ItemSpan, WalkInput};
use crate::item::{check_bounds, check_overlap};
use storage::attr::TupleDesc;
use storage::heap::{HeapTupleHeader, MAX_HEAP_TUPLES_PER_PAGE, SIZEOF_HEAP_TUPLE_HEADER};
use storage::page::{ItemId, LpFlags, Page};
use storage::BlockNumber;
use tracing::{debug, trace, warn};

/// Check every line pointer of a heap page, returns the number of
/// violations found.
pub fn check_heap_tuples(desc: &TupleDesc, page: &Page<'_>, block: BlockNumber) -> u32 {
    let ntuples = page.max_offset();
    let mut errors = 0;

    debug!("[{block}] max number of tuples = {ntuples}");

    if ntuples > MAX_HEAP_TUPLES_PER_PAGE {
        warn!("[{block}] too many line pointers ({ntuples} > {MAX_HEAP_TUPLES_PER_PAGE})");
        errors += 1;
    }

    for i in 0..ntuples {
        errors += check_heap_tuple(desc, page, block, i);
    }

    if errors > 0 {
        warn!("[{block}] is probably corrupted, there were {errors} errors reported");
    }

    errors
}

/// Line pointer state machine for item `i` (0-based), followed by the
/// bounds, overlap and attribute checks for items with storage.
pub(crate) fn check_heap_tuple(
    desc: &TupleDesc,
    page: &Page<'_>,
    block: BlockNumber,
    i: usize,
) -> u32 {
    let item = i + 1;
    let Some(lp) = page.item_id(i) else {
        return 0;
    };
    let mut errors = 0;

    match lp.flags {
        LpFlags::Redirect => {
            trace!("[{block}:{item}] tuple is LP_REDIRECT");
            if lp.len != 0 {
                warn!(
                    "[{block}:{item}] tuple with LP_REDIRECT and len != 0 ({})",
                    lp.len
                );
                errors += 1;
            }
            let max = page.max_offset();
            if lp.off == 0 || lp.off as usize > max {
                warn!(
                    "[{block}:{item}] LP_REDIRECT points to item {} outside [1, {max}]",
                    lp.off
                );
                errors += 1;
            }
            return errors;
        }
        LpFlags::Unused => {
            trace!("[{block}:{item}] tuple is LP_UNUSED");
            if lp.len != 0 {
                warn!(
                    "[{block}:{item}] tuple with LP_UNUSED and len != 0 ({})",
                    lp.len
                );
                errors += 1;
            }
            return errors;
        }
        LpFlags::Dead => {
            trace!("[{block}:{item}] tuple is LP_DEAD");
            if lp.len == 0 {
                return errors;
            }
        }
        LpFlags::Normal => {
            trace!("[{block}:{item}] tuple is LP_NORMAL");
        }
    }

    errors += check_bounds(page, &lp, block, item);
    errors += check_overlap(page, i, &lp, block, ItemId::has_storage);
    errors + check_heap_tuple_attributes(desc, page, block, i, &lp)
}

fn check_heap_tuple_attributes(
    desc: &TupleDesc,
    page: &Page<'_>,
    block: BlockNumber,
    i: usize,
    lp: &ItemId,
) -> u32 {
    let item = i + 1;
    // zero length or past the block end, already reported by the bounds check
    let Some(tuple) = page.item(lp).filter(|t| !t.is_empty()) else {
        return 0;
    };

    trace!("[{block}:{item}] checking attributes for the tuple");

    let Some(header) = HeapTupleHeader::parse(tuple) else {
        warn!(
            "[{block}:{item}] tuple is shorter than the tuple header ({} < {SIZEOF_HEAP_TUPLE_HEADER})",
            lp.len
        );
        return 1;
    };

    let hoff = header.hoff as usize;
    if hoff < header.min_hoff() || hoff > tuple.len() {
        warn!(
            "[{block}:{item}] invalid header length t_hoff={hoff} (expected between {} and {})",
            header.min_hoff(),
            tuple.len()
        );
        return 1;
    }

    let natts = header.natts();
    if natts > desc.natts() {
        warn!(
            "[{block}:{item}] tuple has too many attributes. {natts} found, {} expected",
            desc.natts()
        );
        return 1;
    }

    trace!(
        "[{block}:{item}] tuple has {natts} attributes ({} in relation)",
        desc.natts()
    );

    let span = ItemSpan {
        block,
        item,
        start: lp.off as usize,
        end: lp.end(),
    };
    let walk = walk_attributes(
        page.bytes(),
        desc,
        &span,
        &WalkInput {
            data_start: span.start + hoff,
            natts,
            nulls: header.has_nulls().then(|| header.null_bitmap()),
        },
    );
    let mut errors = walk.errors;

    if header.has_nulls() && !walk.saw_null {
        warn!("[{block}:{item}] has HEAP_HASNULL flag but no NULLs");
        errors += 1;
    }

    if walk.end > span.end {
        warn!(
            "[{block}:{item}] the last attribute ends at {} but the tuple ends at {}",
            walk.end, span.end
        );
        errors += 1;
    }

    errors
}
