use catalog::PgCatalog;
use common::CheckError;
use pgrx::pg_sys::AsPgCStr;
use pgrx::prelude::*;
use pgrx::{GucContext, GucFlags, GucRegistry, GucSetting, PostgresGucEnum};
use verify::{BitmapFormat, CheckConfig};

mod catalog;
mod logging;

pgrx::pg_module_magic!();

#[derive(PostgresGucEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum GucBitmapFormat {
    #[name = c"base64"]
    Base64,
    #[name = c"hex"]
    Hex,
    #[name = c"binary"]
    Binary,
    #[name = c"none"]
    None,
}

impl From<GucBitmapFormat> for BitmapFormat {
    fn from(format: GucBitmapFormat) -> Self {
        match format {
            GucBitmapFormat::Base64 => BitmapFormat::Base64,
            GucBitmapFormat::Hex => BitmapFormat::Hex,
            GucBitmapFormat::Binary => BitmapFormat::Binary,
            GucBitmapFormat::None => BitmapFormat::None,
        }
    }
}

pub(crate) static DEBUG: GucSetting<bool> = GucSetting::<bool>::new(false);
pub(crate) static BITMAP_FORMAT: GucSetting<GucBitmapFormat> =
    GucSetting::<GucBitmapFormat>::new(GucBitmapFormat::Binary);

#[pg_guard]
#[allow(non_snake_case)]
pub unsafe extern "C-unwind" fn _PG_init() {
    if pg_sys::BLCKSZ as usize != storage::BLCKSZ {
        error!(
            "pg_check is built for {} byte blocks, the server uses {}",
            storage::BLCKSZ,
            pg_sys::BLCKSZ
        );
    }
    init_gucs();
    mark_guc_prefix_reserved("pg_check");
}

fn init_gucs() {
    GucRegistry::define_bool_guc(
        c"pg_check.debug",
        c"Dump the item bitmaps of table/index cross-checks",
        c"Dump the item bitmaps of table/index cross-checks",
        &DEBUG,
        GucContext::Suset,
        GucFlags::default(),
    );
    GucRegistry::define_enum_guc(
        c"pg_check.bitmap_format",
        c"Encoding of the bitmap data in debug dumps",
        c"One of base64, hex, binary or none",
        &BITMAP_FORMAT,
        GucContext::Suset,
        GucFlags::default(),
    );
}

fn mark_guc_prefix_reserved(guc_prefix: &str) {
    unsafe { pgrx::pg_sys::MarkGUCPrefixReserved(guc_prefix.as_pg_cstr()) }
}

fn config() -> CheckConfig {
    CheckConfig {
        debug: DEBUG.get(),
        bitmap_format: BITMAP_FORMAT.get().into(),
        // pd_tli holds the page checksum since 9.3
        legacy_timeline: None,
    }
}

fn report(err: anyhow::Error) -> ! {
    let code = match err.downcast_ref::<CheckError>() {
        Some(CheckError::InsufficientPrivilege) => PgSqlErrorCode::ERRCODE_INSUFFICIENT_PRIVILEGE,
        Some(CheckError::WrongObjectType(..)) => PgSqlErrorCode::ERRCODE_WRONG_OBJECT_TYPE,
        Some(CheckError::InvalidBlockNumber(..) | CheckError::RangeWithIndexes) => {
            PgSqlErrorCode::ERRCODE_INVALID_PARAMETER_VALUE
        }
        Some(CheckError::NotFound(..)) => PgSqlErrorCode::ERRCODE_UNDEFINED_OBJECT,
        _ => PgSqlErrorCode::ERRCODE_INTERNAL_ERROR,
    };
    ereport!(PgLogLevel::ERROR, code, err.to_string());
    unreachable!("ereport(ERROR) returned")
}

fn run<F>(check: F) -> i32
where
    F: FnOnce(&PgCatalog, &CheckConfig) -> anyhow::Result<u32>,
{
    let catalog = PgCatalog::new();
    let config = config();
    match logging::with_server_log(|| check(&catalog, &config)) {
        Ok(errors) => i32::try_from(errors).unwrap_or(i32::MAX),
        Err(err) => report(err),
    }
}

/// Number of problems found in the table and, optionally, its indexes.
#[pg_extern]
fn pg_check_table(relation: pg_sys::Oid, check_indexes: bool, cross_check: bool) -> i32 {
    run(|catalog, config| {
        verify::check_table(
            catalog,
            config,
            relation.as_u32(),
            check_indexes,
            cross_check,
        )
    })
}

/// Check blocks `[from, to)` of a table.
#[pg_extern]
fn pg_check_table_pages(relation: pg_sys::Oid, from: i64, to: i64) -> i32 {
    run(|catalog, config| verify::check_table_pages(catalog, config, relation.as_u32(), from, to))
}

#[pg_extern]
fn pg_check_index(relation: pg_sys::Oid) -> i32 {
    run(|catalog, config| verify::check_index(catalog, config, relation.as_u32()))
}

#[pg_extern]
fn pg_check_index_pages(relation: pg_sys::Oid, from: i64, to: i64) -> i32 {
    run(|catalog, config| verify::check_index_pages(catalog, config, relation.as_u32(), from, to))
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;

    fn create_table(name: &str) {
        Spi::run(&format!("DROP TABLE IF EXISTS {name} CASCADE")).unwrap();
        Spi::run(&format!(
            "CREATE TABLE {name} (id int4, label text, score float8) WITH (fillfactor = 50)"
        ))
        .unwrap();
        Spi::run(&format!(
            "INSERT INTO {name} SELECT i, repeat('x', i % 300), CASE WHEN i % 7 = 0 THEN NULL ELSE i END \
             FROM generate_series(1, 2000) i"
        ))
        .unwrap();
        Spi::run(&format!("CREATE INDEX {name}_id_idx ON {name} (id)")).unwrap();
        Spi::run(&format!("CREATE INDEX {name}_label_idx ON {name} (label)")).unwrap();
    }

    fn check(sql: &str) -> i32 {
        Spi::get_one::<i32>(sql).unwrap().unwrap()
    }

    #[pg_test]
    fn clean_table_and_indexes() {
        create_table("pgc_clean");
        assert_eq!(check("SELECT pg_check_table('pgc_clean'::regclass, false, false)"), 0);
        assert_eq!(check("SELECT pg_check_table('pgc_clean'::regclass, true, false)"), 0);
        assert_eq!(check("SELECT pg_check_table('pgc_clean'::regclass, true, true)"), 0);
        assert_eq!(check("SELECT pg_check_index('pgc_clean_id_idx'::regclass)"), 0);
        assert_eq!(check("SELECT pg_check_index('pgc_clean_label_idx'::regclass)"), 0);
    }

    #[pg_test]
    fn hot_updates_cross_check() {
        create_table("pgc_hot");
        // score is not indexed, so these updates stay on the page
        Spi::run("UPDATE pgc_hot SET score = -score WHERE id % 3 = 0").unwrap();
        Spi::run("DELETE FROM pgc_hot WHERE id % 11 = 0").unwrap();
        assert_eq!(check("SELECT pg_check_table('pgc_hot'::regclass, true, true)"), 0);
    }

    #[pg_test]
    fn block_ranges() {
        create_table("pgc_range");
        assert_eq!(check("SELECT pg_check_table_pages('pgc_range'::regclass, 0, 2)"), 0);
        assert_eq!(check("SELECT pg_check_table_pages('pgc_range'::regclass, 100000, 100001)"), 0);
        assert_eq!(check("SELECT pg_check_index_pages('pgc_range_id_idx'::regclass, 1, 3)"), 0);
    }

    #[pg_test]
    fn debug_dump() {
        create_table("pgc_debug");
        Spi::run("SET pg_check.debug = on").unwrap();
        Spi::run("SET pg_check.bitmap_format = 'hex'").unwrap();
        assert_eq!(check("SELECT pg_check_table('pgc_debug'::regclass, true, true)"), 0);
    }

    #[pg_test]
    fn other_access_methods() {
        create_table("pgc_hash");
        Spi::run("CREATE INDEX pgc_hash_hash ON pgc_hash USING hash (id)").unwrap();
        assert_eq!(check("SELECT pg_check_index('pgc_hash_hash'::regclass)"), 0);
        assert_eq!(check("SELECT pg_check_table('pgc_hash'::regclass, true, true)"), 0);
    }

    #[pg_test(error = "invalid starting block number: -1")]
    fn negative_block() {
        create_table("pgc_negative");
        check("SELECT pg_check_table_pages('pgc_negative'::regclass, -1, 1)");
    }

    #[pg_test(error = "object \"pgc_kind_id_idx\" is not a table")]
    fn index_is_not_a_table() {
        create_table("pgc_kind");
        check("SELECT pg_check_table('pgc_kind_id_idx'::regclass, false, false)");
    }

    #[pg_test(error = "object \"pgc_table\" is not an index")]
    fn table_is_not_an_index() {
        create_table("pgc_table");
        check("SELECT pg_check_index('pgc_table'::regclass)");
    }
}
