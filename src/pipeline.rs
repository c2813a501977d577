//! Load one month of SNGPC sales: check the history, fetch, clean, insert, record.
//!
//! Fetch and persistence failures don't stop the loop over months, they are
//! reported in the [`PipelineOutcome`] of the month.  Inserting the rows and
//! recording the month in the history are two separate transactions: if the
//! second one fails the rows stay in the table, the month is not marked as
//! loaded, and a later run will insert the rows again.  That case is reported
//! as [`PipelineOutcome::RecordFailed`].

use std::fmt;
use std::thread;
use std::time::Duration;

use duckdb::Connection;
use log::{error, info, warn};

use crate::db::anvisa::cleaning::{normalize, CleanRecord, RawRecord};
use crate::db::anvisa::lib_anvisa::FetchError;
use crate::db::anvisa::load_history::{already_loaded, record};
use crate::db::anvisa::manipulados_archive::{bulk_insert, ensure_schema, ManipuladosArchive};
use crate::db::anvisa::StoreError;
use crate::interval::month::Month;

/// Where the raw rows of a month come from.
pub trait SalesSource {
    fn fetch(&self, month: &Month) -> Result<Vec<RawRecord>, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The month is in the history already.  Nothing fetched or inserted.
    AlreadyLoaded,
    /// The history couldn't be queried.
    GuardFailed(String),
    /// The file for the month has no rows.
    NoData,
    FetchFailed(String),
    /// The insert was rolled back, the month was not recorded.
    PersistFailed(String),
    /// The rows were inserted but the month could not be recorded in the history.
    RecordFailed { inserted: usize, reason: String },
    /// Number of rows inserted.  The month is recorded in the history.
    Loaded(usize),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PipelineOutcome::AlreadyLoaded | PipelineOutcome::NoData | PipelineOutcome::Loaded(_)
        )
    }

    /// Short label, used to summarize a run.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineOutcome::AlreadyLoaded => "already loaded",
            PipelineOutcome::GuardFailed(_) => "guard failed",
            PipelineOutcome::NoData => "no data",
            PipelineOutcome::FetchFailed(_) => "fetch failed",
            PipelineOutcome::PersistFailed(_) => "persist failed",
            PipelineOutcome::RecordFailed { .. } => "record failed",
            PipelineOutcome::Loaded(_) => "loaded",
        }
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PipelineOutcome::*;
        match self {
            AlreadyLoaded => write!(f, "already loaded, skipped"),
            GuardFailed(e) => write!(f, "can't check load history: {}", e),
            NoData => write!(f, "no data for this month"),
            FetchFailed(e) => write!(f, "fetch failed: {}", e),
            PersistFailed(e) => write!(f, "insert failed: {}", e),
            RecordFailed { inserted, reason } => write!(
                f,
                "{} rows inserted but not recorded in history: {}",
                inserted, reason
            ),
            Loaded(n) => write!(f, "{} rows loaded", n),
        }
    }
}

/// Run the pipeline for one month on an open connection.
pub fn execute_pipeline(
    conn: &mut Connection,
    source: &impl SalesSource,
    month: &Month,
) -> PipelineOutcome {
    info!("Starting pipeline for {} ...", month);

    match already_loaded(conn, month) {
        Ok(true) => {
            info!("Load already done for {}, skipping.", month);
            return PipelineOutcome::AlreadyLoaded;
        }
        Ok(false) => {}
        Err(e) => {
            error!("Can't check load history for {}: {}", month, e);
            return PipelineOutcome::GuardFailed(e.to_string());
        }
    }

    let raw = match source.fetch(month) {
        Ok(raw) if raw.is_empty() => {
            info!("No data returned for {}.", month);
            return PipelineOutcome::NoData;
        }
        Ok(raw) => raw,
        Err(e) => {
            warn!("No data loaded for {}: {}", month, e);
            return PipelineOutcome::FetchFailed(e.to_string());
        }
    };

    let rows = normalize(&raw);

    let inserted = match persist(conn, &rows) {
        Ok(n) => n,
        Err(e) => return PipelineOutcome::PersistFailed(e.to_string()),
    };

    if let Err(e) = record(conn, month, inserted) {
        return PipelineOutcome::RecordFailed {
            inserted,
            reason: e.to_string(),
        };
    }

    info!("Pipeline done for {}.", month);
    PipelineOutcome::Loaded(inserted)
}

fn persist(conn: &mut Connection, rows: &[CleanRecord]) -> Result<usize, StoreError> {
    ensure_schema(conn)?;
    bulk_insert(conn, rows)
}

/// Load the months in order, pausing between them.  Each month gets its own
/// connection.  Stops only if the database can't be opened.
pub fn run_months(
    archive: &ManipuladosArchive,
    source: &impl SalesSource,
    months: &[Month],
    pause: Duration,
) -> Result<Vec<(Month, PipelineOutcome)>, StoreError> {
    let mut out = Vec::with_capacity(months.len());
    for (i, month) in months.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            thread::sleep(pause);
        }
        let outcome = archive.execute_pipeline(source, month)?;
        if outcome.is_success() {
            info!("{}: {}", month, outcome);
        } else {
            error!("{}: {}", month, outcome);
        }
        out.push((*month, outcome));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::error::Error;

    use duckdb::Connection;
    use reqwest::StatusCode;

    use super::*;
    use crate::db::anvisa::lib_anvisa::{parse_csv, CertVerification};
    use crate::db::anvisa::load_history::get_history;
    use crate::interval::month::month;

    /// Serves canned rows and counts the calls.
    #[derive(Default)]
    struct FakeSource {
        rows: RefCell<HashMap<Month, Vec<RawRecord>>>,
        fail: bool,
        calls: Cell<usize>,
    }

    impl FakeSource {
        fn with(month: Month, n: usize) -> FakeSource {
            let source = FakeSource::default();
            source.rows.borrow_mut().insert(month, rows_for(month, n));
            source
        }
    }

    impl SalesSource for FakeSource {
        fn fetch(&self, month: &Month) -> Result<Vec<RawRecord>, FetchError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(FetchError::Status(StatusCode::NOT_FOUND));
            }
            Ok(self.rows.borrow().get(month).cloned().unwrap_or_default())
        }
    }

    fn rows_for(month: Month, n: usize) -> Vec<RawRecord> {
        let mut body = String::from(
            "ANO_VENDA;MES_VENDA;UF_VENDA;PRINCIPIO_ATIVO;QTD_ATIVO_POR_UNID_FARMACOTEC;QTD_UNIDADE_FARMACOTECNICA;IDADE\n",
        );
        for i in 0..n {
            body.push_str(&format!(
                "{};{};SP; FLUOXETINA ;1,5;{};{}\n",
                month.year(),
                month.month(),
                i + 1,
                20 + i
            ));
        }
        parse_csv(&body).unwrap()
    }

    fn count_sales(conn: &Connection, month: &Month) -> Result<i64, duckdb::Error> {
        conn.query_row(
            "SELECT COUNT(*) FROM vendas_manipulados WHERE ano_venda = ? AND mes_venda = ?;",
            [i64::from(month.year()), i64::from(month.month())],
            |row| row.get(0),
        )
    }

    fn init_log() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Info)
            .is_test(true)
            .try_init();
    }

    #[test]
    fn load_new_month() -> Result<(), Box<dyn Error>> {
        init_log();
        let mut conn = Connection::open_in_memory()?;
        let m = month(2014, 1);
        let source = FakeSource::with(m, 5);

        let outcome = execute_pipeline(&mut conn, &source, &m);
        assert_eq!(outcome, PipelineOutcome::Loaded(5));
        assert_eq!(source.calls.get(), 1);
        assert_eq!(count_sales(&conn, &m)?, 5);

        let history = get_history(&conn)?;
        assert_eq!(history.len(), 1);
        assert_eq!((history[0].ano, history[0].mes), (2014, 1));
        assert_eq!(history[0].registros_inseridos, 5);
        Ok(())
    }

    #[test]
    fn short_row_still_loads() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let m = month(2019, 4);
        let body = "ANO_VENDA;MES_VENDA;UF_VENDA;MUNICIPIO_VENDA;IDADE\n\
                    2019;4;MG;BELO HORIZONTE;40\n\
                    2019;4;SP\n\
                    2019;4;RJ;NITER\u{d3}I;51\n";
        let source = FakeSource::default();
        source.rows.borrow_mut().insert(m, parse_csv(body)?);

        assert_eq!(execute_pipeline(&mut conn, &source, &m), PipelineOutcome::Loaded(3));
        assert_eq!(count_sales(&conn, &m)?, 3);
        let missing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vendas_manipulados WHERE municipio_venda IS NULL AND idade IS NULL;",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(missing, 1);
        assert_eq!(get_history(&conn)?[0].registros_inseridos, 3);
        Ok(())
    }

    #[test]
    fn rerun_is_a_noop() -> Result<(), Box<dyn Error>> {
        init_log();
        let mut conn = Connection::open_in_memory()?;
        let m = month(2014, 1);
        let source = FakeSource::with(m, 3);

        assert_eq!(execute_pipeline(&mut conn, &source, &m), PipelineOutcome::Loaded(3));
        assert_eq!(
            execute_pipeline(&mut conn, &source, &m),
            PipelineOutcome::AlreadyLoaded
        );
        // the second run didn't hit the source
        assert_eq!(source.calls.get(), 1);
        assert_eq!(count_sales(&conn, &m)?, 3);
        assert_eq!(get_history(&conn)?.len(), 1);
        Ok(())
    }

    #[test]
    fn already_recorded_month_is_not_fetched() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        let m = month(2016, 7);
        record(&mut conn, &m, 10)?;
        let source = FakeSource::with(m, 4);

        assert_eq!(
            execute_pipeline(&mut conn, &source, &m),
            PipelineOutcome::AlreadyLoaded
        );
        assert_eq!(source.calls.get(), 0);
        assert_eq!(count_sales(&conn, &m)?, 0);
        Ok(())
    }

    #[test]
    fn empty_month_records_nothing() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let source = FakeSource::default();
        let m = month(2014, 2);

        assert_eq!(execute_pipeline(&mut conn, &source, &m), PipelineOutcome::NoData);
        assert!(get_history(&conn)?.is_empty());
        // the schema is only created when there is something to insert
        ensure_schema(&conn)?;
        assert_eq!(count_sales(&conn, &m)?, 0);
        Ok(())
    }

    #[test]
    fn failed_fetch_records_nothing() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        let source = FakeSource {
            fail: true,
            ..Default::default()
        };
        let m = month(2014, 3);
        match execute_pipeline(&mut conn, &source, &m) {
            PipelineOutcome::FetchFailed(reason) => assert!(reason.contains("404")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(get_history(&conn)?.is_empty());
        Ok(())
    }

    #[test]
    fn failed_record_is_reported() -> Result<(), Box<dyn Error>> {
        let mut conn = Connection::open_in_memory()?;
        // a history table with an incompatible shape makes the record step fail
        conn.execute_batch(
            "CREATE TABLE historico_carga (ano INTEGER NOT NULL, mes INTEGER NOT NULL, extra INTEGER NOT NULL);",
        )?;
        let m = month(2015, 5);
        let source = FakeSource::with(m, 2);
        match execute_pipeline(&mut conn, &source, &m) {
            PipelineOutcome::RecordFailed { inserted, .. } => assert_eq!(inserted, 2),
            other => panic!("unexpected outcome {:?}", other),
        }
        // rows are in, the month is not marked
        assert_eq!(count_sales(&conn, &m)?, 2);
        assert!(!already_loaded(&conn, &m)?);
        Ok(())
    }

    #[test]
    fn run_months_on_file() -> Result<(), Box<dyn Error>> {
        init_log();
        let dir = tempfile::tempdir()?;
        let archive = ManipuladosArchive {
            base_url: "http://localhost".to_string(),
            duckdb_path: dir.path().join("anvisa.duckdb").to_string_lossy().to_string(),
            cert: CertVerification::Enabled,
        };
        let source = FakeSource::with(month(2014, 1), 2);
        source
            .rows
            .borrow_mut()
            .insert(month(2014, 3), rows_for(month(2014, 3), 4));
        let months = month(2014, 1).up_to(&month(2014, 3));

        let outcomes = run_months(&archive, &source, &months, Duration::ZERO)?;
        let expected = vec![
            (month(2014, 1), PipelineOutcome::Loaded(2)),
            (month(2014, 2), PipelineOutcome::NoData),
            (month(2014, 3), PipelineOutcome::Loaded(4)),
        ];
        assert_eq!(outcomes, expected);

        // second pass: everything loaded is skipped, the empty month is tried again
        let outcomes = run_months(&archive, &source, &months, Duration::ZERO)?;
        assert_eq!(outcomes[0].1, PipelineOutcome::AlreadyLoaded);
        assert_eq!(outcomes[1].1, PipelineOutcome::NoData);
        assert_eq!(outcomes[2].1, PipelineOutcome::AlreadyLoaded);
        assert_eq!(source.calls.get(), 4);

        let conn = archive.open()?;
        assert_eq!(get_history(&conn)?.len(), 2);
        assert_eq!(count_sales(&conn, &month(2014, 3))?, 4);
        Ok(())
    }
}
