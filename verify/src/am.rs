//! Page checkers per index access method.

use crate::bitmap::ItemBitmap;
use crate::btree::btree_check_page;
use crate::config::CheckConfig;
use crate::header::check_header;
use crate::relation::AccessMethod;
use storage::attr::TupleDesc;
use storage::page::Page;
use storage::BlockNumber;

pub type PageCheckFn =
    fn(&TupleDesc, &Page<'_>, BlockNumber, &CheckConfig, Option<&mut ItemBitmap>) -> u32;

pub struct AmChecker {
    pub name: &'static str,
    pub check_page: PageCheckFn,
    /// Leaf pages add their heap TIDs to a bitmap.
    pub cross_check: bool,
}

static BTREE: AmChecker = AmChecker {
    name: "btree",
    check_page: btree_check_page,
    cross_check: true,
};

static GENERIC: AmChecker = AmChecker {
    name: "generic",
    check_page: header_only,
    cross_check: false,
};

static CHECKERS: &[(AccessMethod, &AmChecker)] = &[(AccessMethod::Btree, &BTREE)];

/// Page format checks for access methods without a dedicated checker.
fn header_only(
    _desc: &TupleDesc,
    page: &Page<'_>,
    block: BlockNumber,
    config: &CheckConfig,
    _bitmap: Option<&mut ItemBitmap>,
) -> u32 {
    check_header(page.header(), block, config).errors
}

pub fn lookup(am: AccessMethod) -> &'static AmChecker {
    CHECKERS
        .iter()
        .find(|(method, _)| *method == am)
        .map_or(&GENERIC, |(_, checker)| *checker)
}
