use crate::config::CheckConfig;
use storage::page::{PageHeader, PD_VALID_FLAG_BITS, PG_PAGE_LAYOUT_VERSION, SIZE_OF_PAGE_HEADER};
use storage::{BlockNumber, BLCKSZ};
use tracing::{debug, warn};

/// What the header check concluded about a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    /// Header is clean, the page content can be walked.
    Valid,
    /// Never initialized (all-zero header).
    New,
    /// Layout version older than the current one, content not checked.
    Obsolete,
    /// At least one header violation was reported.
    Corrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderReport {
    pub errors: u32,
    pub state: PageState,
}

impl HeaderReport {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state == PageState::Valid
    }

    /// New and obsolete pages end all further work on the block.
    #[inline]
    pub fn is_final(&self) -> bool {
        matches!(self.state, PageState::New | PageState::Obsolete)
    }
}

fn in_page(value: u16) -> bool {
    let value = value as usize;
    (SIZE_OF_PAGE_HEADER..=BLCKSZ).contains(&value)
}

/// Generic page header checks shared by all relation kinds. Only the 24
/// header bytes are looked at.
pub fn check_header(header: &PageHeader, block: BlockNumber, config: &CheckConfig) -> HeaderReport {
    debug!(
        "[{block}] header [lower={}, upper={}, special={} free={}]",
        header.lower,
        header.upper,
        header.special,
        header.upper as i32 - header.lower as i32
    );

    if header.is_new() {
        debug!("[{block}] is a new page");
        return HeaderReport {
            errors: 0,
            state: PageState::New,
        };
    }

    let mut errors = 0;

    if header.page_size() != BLCKSZ {
        warn!("[{block}] invalid page size {} ({BLCKSZ})", header.page_size());
        errors += 1;
    }

    let version = header.layout_version();
    if version > PG_PAGE_LAYOUT_VERSION {
        warn!("[{block}] invalid page layout version {version}");
        errors += 1;
    } else if version < PG_PAGE_LAYOUT_VERSION {
        warn!("[{block}] obsolete page layout version {version}, skipping the remaining checks");
        return HeaderReport {
            errors,
            state: PageState::Obsolete,
        };
    }

    for (name, value) in [
        ("lower", header.lower),
        ("upper", header.upper),
        ("special", header.special),
    ] {
        if !in_page(value) {
            warn!("[{block}] {name} {value} not between {SIZE_OF_PAGE_HEADER} and {BLCKSZ}");
            errors += 1;
        }
    }

    if header.lower > header.upper {
        warn!(
            "[{block}] lower > upper ({} > {})",
            header.lower, header.upper
        );
        errors += 1;
    }

    if header.upper > header.special {
        warn!(
            "[{block}] upper > special ({} > {})",
            header.upper, header.special
        );
        errors += 1;
    }

    if header.flags & !PD_VALID_FLAG_BITS != 0 {
        warn!(
            "[{block}] invalid flags {:#06x} (valid bits {PD_VALID_FLAG_BITS:#06x})",
            header.flags
        );
        errors += 1;
    }

    if let Some(current) = config.legacy_timeline {
        let tli = header.timeline() as u32;
        if tli > current {
            warn!("[{block}] timeline {tli} is in the future (current {current})");
            errors += 1;
        }
    }

    HeaderReport {
        errors,
        state: if errors == 0 {
            PageState::Valid
        } else {
            PageState::Corrupted
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized() -> PageHeader {
        PageHeader {
            lower: SIZE_OF_PAGE_HEADER as u16,
            upper: BLCKSZ as u16,
            special: BLCKSZ as u16,
            pagesize_version: BLCKSZ as u16 | PG_PAGE_LAYOUT_VERSION as u16,
            ..Default::default()
        }
    }

    #[test]
    fn empty_page_is_valid() {
        let report = check_header(&initialized(), 0, &CheckConfig::default());
        assert_eq!(report.errors, 0);
        assert!(report.is_valid());
    }

    #[test]
    fn zeroed_page_is_new() {
        let report = check_header(&PageHeader::default(), 3, &CheckConfig::default());
        assert_eq!(report.errors, 0);
        assert_eq!(report.state, PageState::New);
        assert!(report.is_final());
    }

    #[test]
    fn upper_above_special() {
        let header = PageHeader {
            upper: 200,
            special: 100,
            ..initialized()
        };
        let report = check_header(&header, 1, &CheckConfig::default());
        assert_eq!(report.errors, 1);
        assert_eq!(report.state, PageState::Corrupted);
    }

    #[test]
    fn obsolete_layout_is_not_counted() {
        let header = PageHeader {
            pagesize_version: BLCKSZ as u16 | 3,
            // would be reported on a current layout
            lower: 10,
            ..initialized()
        };
        let report = check_header(&header, 1, &CheckConfig::default());
        assert_eq!(report.errors, 0);
        assert_eq!(report.state, PageState::Obsolete);
    }

    #[test]
    fn future_layout_keeps_checking() {
        let header = PageHeader {
            pagesize_version: 4096 | 5,
            flags: 0x0100,
            ..initialized()
        };
        let report = check_header(&header, 1, &CheckConfig::default());
        // page size, layout version, flags
        assert_eq!(report.errors, 3);
    }

    #[test]
    fn legacy_timeline() {
        let header = PageHeader {
            checksum: 7,
            ..initialized()
        };
        let config = CheckConfig {
            legacy_timeline: Some(5),
            ..Default::default()
        };
        assert_eq!(check_header(&header, 1, &config).errors, 1);
        assert_eq!(check_header(&header, 1, &CheckConfig::default()).errors, 0);
    }
}
