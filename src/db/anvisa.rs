pub mod cleaning;
pub mod lib_anvisa;
pub mod load_history;
pub mod manipulados_archive;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("count {0} doesn't fit in a BIGINT column")]
    Overflow(usize),
}
