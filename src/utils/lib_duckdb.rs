use std::time::Duration;

use duckdb::{AccessMode, Config, Connection};
use log::warn;

/// `AccessMode` isn't `Clone`, rebuild the variant for every attempt.
fn config_for(access_mode: &AccessMode) -> Result<Config, duckdb::Error> {
    let mode = match access_mode {
        AccessMode::Automatic => AccessMode::Automatic,
        AccessMode::ReadOnly => AccessMode::ReadOnly,
        AccessMode::ReadWrite => AccessMode::ReadWrite,
    };
    Config::default().access_mode(mode)
}

/// Open a DuckDB connection, retrying while another process holds the file lock.
/// The wait doubles after every failed attempt.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        let config = config_for(&access_mode)?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "Can't open {} (attempt {}/{}): {}, retrying in {:?}",
                    duckdb_path, attempts, max_attempts, e, wait_duration
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::time::Duration;

    use duckdb::AccessMode;

    use super::*;

    #[test]
    fn open_new_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.duckdb");
        let conn = open_with_retry(
            path.to_str().unwrap(),
            3,
            Duration::from_millis(1),
            AccessMode::ReadWrite,
        )?;
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")?;
        drop(conn);

        let conn = open_with_retry(
            path.to_str().unwrap(),
            3,
            Duration::from_millis(1),
            AccessMode::ReadOnly,
        )?;
        let x: i32 = conn.query_row("SELECT x FROM t;", [], |row| row.get(0))?;
        assert_eq!(x, 1);
        Ok(())
    }

    #[test]
    fn give_up_after_max_attempts() {
        // read-only access to a file that doesn't exist always fails
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.duckdb");
        let res = open_with_retry(
            path.to_str().unwrap(),
            2,
            Duration::from_millis(1),
            AccessMode::ReadOnly,
        );
        assert!(res.is_err());
    }

    #[test]
    fn config_for_every_mode() {
        for mode in [AccessMode::Automatic, AccessMode::ReadOnly, AccessMode::ReadWrite] {
            assert!(config_for(&mode).is_ok());
        }
    }
}
