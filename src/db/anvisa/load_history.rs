// Record of the months already loaded in `vendas_manipulados`, one row per month.
// Uniqueness of (ano, mes) is only enforced by checking before loading.

use duckdb::{params, Connection};
use jiff::Zoned;
use log::{error, info};
use serde::Serialize;

use super::StoreError;
use crate::interval::month::Month;

pub(crate) const HISTORY_SCHEMA: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_historico_carga_id START 1;
CREATE TABLE IF NOT EXISTS historico_carga (
    id BIGINT PRIMARY KEY DEFAULT nextval('seq_historico_carga_id'),
    ano INTEGER NOT NULL,
    mes INTEGER NOT NULL,
    registros_inseridos BIGINT NOT NULL,
    data_execucao VARCHAR NOT NULL
);
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadHistoryRow {
    pub ano: i32,
    pub mes: i32,
    pub registros_inseridos: i64,
    pub data_execucao: String,
}

fn history_table_exists(conn: &Connection) -> Result<bool, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM duckdb_tables() WHERE table_name = 'historico_carga';",
        [],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// True if a history row exists for this exact month.
pub fn already_loaded(conn: &Connection, month: &Month) -> Result<bool, StoreError> {
    if !history_table_exists(conn)? {
        return Ok(false);
    }
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM historico_carga WHERE ano = ? AND mes = ?;",
        params![i32::from(month.year()), i32::from(month.month())],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Mark the month as loaded, stamped with the current local time.
/// On failure the insert is rolled back and the error returned.
pub fn record(conn: &mut Connection, month: &Month, count: usize) -> Result<(), StoreError> {
    match insert_history_row(conn, month, count) {
        Ok(()) => {
            info!("Load recorded in history: {}", month);
            Ok(())
        }
        Err(e) => {
            error!("Failed to record load for {}, rolled back: {}", month, e);
            Err(e)
        }
    }
}

fn insert_history_row(conn: &mut Connection, month: &Month, count: usize) -> Result<(), StoreError> {
    let count = i64::try_from(count).map_err(|_| StoreError::Overflow(count))?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO historico_carga (ano, mes, registros_inseridos, data_execucao) VALUES (?, ?, ?, ?);",
        params![
            i32::from(month.year()),
            i32::from(month.month()),
            count,
            Zoned::now().datetime().to_string(),
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// All recorded loads, oldest month first.
pub fn get_history(conn: &Connection) -> Result<Vec<LoadHistoryRow>, StoreError> {
    if !history_table_exists(conn)? {
        return Ok(vec![]);
    }
    let mut stmt = conn.prepare(
        r#"
SELECT ano, mes, registros_inseridos, data_execucao
FROM historico_carga
ORDER BY ano, mes, id;
    "#,
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LoadHistoryRow {
                ano: row.get(0)?,
                mes: row.get(1)?,
                registros_inseridos: row.get(2)?,
                data_execucao: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
