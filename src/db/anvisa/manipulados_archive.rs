// Monthly sales of compounded drugs (medicamentos manipulados) reported to SNGPC.
// https://dados.anvisa.gov.br/dados/SNGPC/Manipulados/

use std::path::Path;
use std::time::Duration;

use duckdb::{params, AccessMode, Connection};
use log::{error, info};

use super::cleaning::{CleanRecord, RawRecord};
use super::lib_anvisa::{download_text, parse_csv, CertVerification, FetchError};
use super::load_history::HISTORY_SCHEMA;
use super::StoreError;
use crate::interval::month::Month;
use crate::pipeline::{self, PipelineOutcome, SalesSource};
use crate::utils::lib_duckdb::open_with_retry;

const SALES_SCHEMA: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_vendas_manipulados_id START 1;
CREATE TABLE IF NOT EXISTS vendas_manipulados (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_vendas_manipulados_id'),
    ano_venda BIGINT,
    mes_venda BIGINT,
    uf_venda VARCHAR,
    municipio_venda VARCHAR,
    dcb VARCHAR,
    principio_ativo VARCHAR,
    qtd_ativo_por_unid_farmacotec DOUBLE,
    unidade_medida_principio_ativo VARCHAR,
    qtd_unidade_farmacotecnica DOUBLE,
    tipo_unidade_farmacotecnica VARCHAR,
    conselho_prescritor VARCHAR,
    uf_conselho_prescritor VARCHAR,
    tipo_receituario VARCHAR,
    cid10 VARCHAR,
    sexo BIGINT,
    idade BIGINT,
    unidade_idade BIGINT
);
"#;

const INSERT_SALE: &str = r#"
INSERT INTO vendas_manipulados (
    ano_venda, mes_venda, uf_venda, municipio_venda, dcb, principio_ativo,
    qtd_ativo_por_unid_farmacotec, unidade_medida_principio_ativo,
    qtd_unidade_farmacotecnica, tipo_unidade_farmacotecnica, conselho_prescritor,
    uf_conselho_prescritor, tipo_receituario, cid10, sexo, idade, unidade_idade
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#;

/// Numeric columns of `vendas_manipulados` that can be aggregated into a monthly series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericColumn {
    QtdAtivoPorUnidFarmacotec,
    QtdUnidadeFarmacotecnica,
    Idade,
}

impl NumericColumn {
    pub fn name(&self) -> &'static str {
        match self {
            NumericColumn::QtdAtivoPorUnidFarmacotec => "qtd_ativo_por_unid_farmacotec",
            NumericColumn::QtdUnidadeFarmacotecnica => "qtd_unidade_farmacotecnica",
            NumericColumn::Idade => "idade",
        }
    }
}

impl std::str::FromStr for NumericColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qtd_ativo_por_unid_farmacotec" => Ok(NumericColumn::QtdAtivoPorUnidFarmacotec),
            "qtd_unidade_farmacotecnica" => Ok(NumericColumn::QtdUnidadeFarmacotecnica),
            "idade" => Ok(NumericColumn::Idade),
            _ => Err(format!("Failed to parse {s} as a numeric column")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ManipuladosArchive {
    pub base_url: String,
    pub duckdb_path: String,
    pub cert: CertVerification,
}

impl ManipuladosArchive {
    /// Url of the CSV file for the month, e.g. `.../EDA_Manipulados_201401.csv`
    pub fn url(&self, month: &Month) -> String {
        format!(
            "{}/EDA_Manipulados_{}.csv",
            self.base_url.trim_end_matches('/'),
            month.strftime("%Y%m")
        )
    }

    /// Open a read-write connection to the archive's database.  The connection
    /// is closed when dropped.
    pub fn open(&self) -> Result<Connection, StoreError> {
        if let Some(dir) = Path::new(&self.duckdb_path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        Ok(open_with_retry(
            &self.duckdb_path,
            8,
            Duration::from_millis(25),
            AccessMode::ReadWrite,
        )?)
    }

    /// Load one month in a connection of its own.  The connection is released on
    /// every exit path.
    pub fn execute_pipeline(
        &self,
        source: &impl SalesSource,
        month: &Month,
    ) -> Result<PipelineOutcome, StoreError> {
        let mut conn = self.open()?;
        Ok(pipeline::execute_pipeline(&mut conn, source, month))
    }

    /// Read the sales of a numeric column summed by month, skipping nulls.
    /// Rows without a valid year and month are ignored.
    pub fn get_monthly_totals(
        &self,
        conn: &Connection,
        column: NumericColumn,
    ) -> Result<Vec<(Month, f64)>, StoreError> {
        let query = format!(
            r#"
SELECT ano_venda, mes_venda, SUM({col})::DOUBLE AS total
FROM vendas_manipulados
WHERE {col} IS NOT NULL
  AND ano_venda IS NOT NULL
  AND mes_venda BETWEEN 1 AND 12
GROUP BY ano_venda, mes_venda
ORDER BY ano_venda, mes_venda;
    "#,
            col = column.name()
        );
        let mut stmt = conn.prepare(&query)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<usize, i64>(0)?,
                    row.get::<usize, i64>(1)?,
                    row.get::<usize, f64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(year, month, total)| {
                let m = Month::new(i16::try_from(year).ok()?, i8::try_from(month).ok()?).ok()?;
                Some((m, total))
            })
            .collect())
    }
}

impl SalesSource for ManipuladosArchive {
    fn fetch(&self, month: &Month) -> Result<Vec<RawRecord>, FetchError> {
        let url = self.url(month);
        info!("downloading {} ...", url);
        let res = download_text(&url, &self.cert).and_then(|body| Ok(parse_csv(&body)?));
        match &res {
            Ok(rows) => info!("got {} rows for {}", rows.len(), month),
            Err(FetchError::Status(status)) => error!("HTTP error for {}: {}", url, status),
            Err(FetchError::Connect(e)) => {
                error!("Connection or certificate error for {}: {}", url, e)
            }
            Err(e) => error!("Failed to get {}: {}", url, e),
        }
        res
    }
}

/// Create both tables if they don't exist.  Safe to call repeatedly.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SALES_SCHEMA)?;
    conn.execute_batch(HISTORY_SCHEMA)?;
    Ok(())
}

/// Insert all rows in one transaction.  Either all rows are inserted or none.
pub fn bulk_insert(conn: &mut Connection, rows: &[CleanRecord]) -> Result<usize, StoreError> {
    match insert_rows(conn, rows) {
        Ok(n) => {
            info!("{} rows inserted into vendas_manipulados", n);
            Ok(n)
        }
        Err(e) => {
            error!("Failed to insert rows into vendas_manipulados, rolled back: {}", e);
            Err(e)
        }
    }
}

fn insert_rows(conn: &mut Connection, rows: &[CleanRecord]) -> Result<usize, StoreError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(INSERT_SALE)?;
        for r in rows {
            stmt.execute(params![
                r.ano_venda,
                r.mes_venda,
                r.uf_venda,
                r.municipio_venda,
                r.dcb,
                r.principio_ativo,
                r.qtd_ativo_por_unid_farmacotec,
                r.unidade_medida_principio_ativo,
                r.qtd_unidade_farmacotecnica,
                r.tipo_unidade_farmacotecnica,
                r.conselho_prescritor,
                r.uf_conselho_prescritor,
                r.tipo_receituario,
                r.cid10,
                r.sexo,
                r.idade,
                r.unidade_idade,
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}
