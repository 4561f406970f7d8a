//! Line pointer checks shared by the heap and b-tree walkers.

use storage::page::{ItemId, Page};
use storage::BlockNumber;
use tracing::warn;

/// Offset and length of a storage-bearing item against the page bounds.
/// `item` is the 1-based offset number used in messages.
pub(crate) fn check_bounds(page: &Page<'_>, lp: &ItemId, block: BlockNumber, item: usize) -> u32 {
    let header = page.header();
    let mut errors = 0;

    if lp.len == 0 {
        warn!("[{block}:{item}] tuple with length = 0 ({})", lp.len);
        errors += 1;
    }

    if lp.off == 0 {
        warn!("[{block}:{item}] tuple with offset <= 0 ({})", lp.off);
        errors += 1;
    }

    if lp.off < header.upper {
        warn!(
            "[{block}:{item}] tuple with offset < upper ({} < {})",
            lp.off, header.upper
        );
        errors += 1;
    }

    if lp.end() > header.special as usize {
        warn!(
            "[{block}:{item}] tuple with offset + length > special ({} + {} > {})",
            lp.off, lp.len, header.special
        );
        errors += 1;
    }

    errors
}

/// Compare item `i` against every earlier item accepted by `counts`, one
/// error per intersecting pair of `[off, off + len)` intervals.
pub(crate) fn check_overlap<F>(
    page: &Page<'_>,
    i: usize,
    lp: &ItemId,
    block: BlockNumber,
    counts: F,
) -> u32
where
    F: Fn(&ItemId) -> bool,
{
    let (a, b) = (lp.off as usize, lp.end());
    let mut errors = 0;
    for (j, other) in page.item_ids().take(i) {
        if !counts(&other) {
            continue;
        }
        let (c, d) = (other.off as usize, other.end());
        if a < d && c < b {
            warn!(
                "[{block}:{}] intersects with [{block}:{}] ({a},{b}) vs. ({c},{d})",
                i + 1,
                j + 1
            );
            errors += 1;
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::fixture::PageBuilder;
    use storage::page::LpFlags;

    #[test]
    fn overlapping_items() {
        let mut builder = PageBuilder::heap();
        builder.header_mut().upper = 7900;
        builder.push_item_id(ItemId::new(8000, LpFlags::Normal, 100));
        builder.push_item_id(ItemId::new(8050, LpFlags::Normal, 100));
        builder.push_item_id(ItemId::new(7900, LpFlags::Normal, 100));
        let buf = builder.finish();
        let page = Page::from_slice(&buf).unwrap();

        let lp1 = page.item_id(1).unwrap();
        assert_eq!(check_overlap(&page, 1, &lp1, 0, ItemId::has_storage), 1);
        // adjacent intervals do not intersect
        let lp2 = page.item_id(2).unwrap();
        assert_eq!(check_overlap(&page, 2, &lp2, 0, ItemId::has_storage), 0);
    }

    #[test]
    fn identical_items_intersect() {
        let mut builder = PageBuilder::heap();
        builder.header_mut().upper = 8000;
        builder.push_item_id(ItemId::new(8000, LpFlags::Normal, 64));
        builder.push_item_id(ItemId::new(8000, LpFlags::Normal, 64));
        let buf = builder.finish();
        let page = Page::from_slice(&buf).unwrap();
        let lp = page.item_id(1).unwrap();
        assert_eq!(check_overlap(&page, 1, &lp, 0, ItemId::has_storage), 1);
    }

    #[test]
    fn bounds() {
        let mut builder = PageBuilder::heap();
        builder.header_mut().upper = 8000;
        let buf = builder.finish();
        let page = Page::from_slice(&buf).unwrap();
        assert_eq!(check_bounds(&page, &ItemId::new(8000, LpFlags::Normal, 64), 0, 1), 0);
        // below upper and past special
        assert_eq!(check_bounds(&page, &ItemId::new(7990, LpFlags::Normal, 300), 0, 1), 2);
        assert_eq!(check_bounds(&page, &ItemId::new(0, LpFlags::Normal, 0), 0, 1), 3);
    }
}
