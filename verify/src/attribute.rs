//! Attribute walker shared by heap and index tuples.
//!
//! The walker moves a cursor over the attribute data of one item using the
//! relation's tuple descriptor and reports every value whose length cannot
//! be trusted. It never reads past the end of the item.

use storage::attr::{AttrMeta, TupleDesc};
use storage::heap::att_isnull;
use storage::varlena::{CompressionMethod, VarlenaHeader, MAX_VARLENA_RAW_SIZE};
use storage::BlockNumber;
use tracing::{trace, warn};

/// Position of the item being walked, in page coordinates.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ItemSpan {
    pub block: BlockNumber,
    /// 1-based offset number.
    pub item: usize,
    pub start: usize,
    pub end: usize,
}

pub(crate) struct WalkInput<'a> {
    /// Page offset of the first attribute.
    pub data_start: usize,
    pub natts: usize,
    /// Null bitmap when the item announces NULLs.
    pub nulls: Option<&'a [u8]>,
}

#[derive(Debug, Default)]
pub(crate) struct WalkOutcome {
    pub errors: u32,
    /// Cursor after the last attribute that was measured.
    pub end: usize,
    pub saw_null: bool,
}

enum Measured {
    Len(usize),
    Stop,
}

/// Length of the value at `off`. Reported problems are added to `errors`.
fn measure(
    item: &[u8],
    span: &ItemSpan,
    attr: &AttrMeta,
    off: usize,
    errors: &mut u32,
) -> Measured {
    let (block, i) = (span.block, span.item);

    if attr.is_varlena() {
        let Some(header) = VarlenaHeader::parse(item, off) else {
            warn!(
                "[{block}:{i}] attribute '{}' (off={off}) varlena header overflows tuple end (off={}, len={})",
                attr.name,
                span.start,
                span.end - span.start
            );
            *errors += 1;
            return Measured::Stop;
        };
        let Some(len) = header.size() else {
            if let VarlenaHeader::External { tag } = header {
                warn!("[{block}:{i}] attribute '{}' has unknown TOAST tag {tag}", attr.name);
            }
            *errors += 1;
            return Measured::Stop;
        };
        if len < header.min_size() {
            warn!(
                "[{block}:{i}] attribute '{}' has invalid length {len} (shorter than its header)",
                attr.name
            );
            *errors += 1;
            return Measured::Stop;
        }
        if let Some(raw) = header.raw_size() {
            if raw > MAX_VARLENA_RAW_SIZE {
                warn!(
                    "[{block}:{i}] attribute '{}' has invalid length {raw} (should be between 0 and 1G)",
                    attr.name
                );
                *errors += 1;
            }
        }
        if let Some(CompressionMethod::Invalid(id)) = header.compression_method() {
            warn!(
                "[{block}:{i}] attribute '{}' uses unknown compression method {id}",
                attr.name
            );
            *errors += 1;
        }
        return Measured::Len(len);
    }

    if attr.is_cstring() {
        let rest = item.get(off..).unwrap_or_default();
        let len = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        // an unterminated string runs one byte past the item end
        return Measured::Len(len + 1);
    }

    Measured::Len(attr.attlen.max(0) as usize)
}

/// Walk `input.natts` attributes starting at `input.data_start`. `page`
/// is the whole block; reads are confined to `[span.start, span.end)`.
pub(crate) fn walk_attributes(
    page: &[u8],
    desc: &TupleDesc,
    span: &ItemSpan,
    input: &WalkInput<'_>,
) -> WalkOutcome {
    let (block, i) = (span.block, span.item);
    let item = &page[..span.end.min(page.len())];
    let mut out = WalkOutcome {
        end: input.data_start,
        ..Default::default()
    };
    let mut off = input.data_start;

    for (j, attr) in desc.iter().take(input.natts).enumerate() {
        if let Some(bits) = input.nulls {
            if att_isnull(j, bits) {
                trace!("[{block}:{i}] attribute '{}' is NULL (skipping)", attr.name);
                out.saw_null = true;
                continue;
            }
        }

        off = attr.align_pointer(off, item.get(off).copied());

        let len = match measure(item, span, attr, off, &mut out.errors) {
            Measured::Len(len) => len,
            Measured::Stop => break,
        };

        if off + len > span.end {
            warn!(
                "[{block}:{i}] attribute '{}' (off={off} len={len}) overflows tuple end (off={}, len={})",
                attr.name,
                span.start,
                span.end - span.start
            );
            out.errors += 1;
            break;
        }

        off += len;
        trace!("[{block}:{i}] attribute '{}' length={len}", attr.name);
    }

    trace!(
        "[{block}:{i}] last attribute ends at {off}, tuple ends at {}",
        span.end
    );
    out.end = off;
    out
}
