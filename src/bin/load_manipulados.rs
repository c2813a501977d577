use std::{error::Error, time::Duration};

use clap::Parser;
use itertools::Itertools;
use log::{info, warn};
use sngpc::{
    db::{anvisa::manipulados_archive::ensure_schema, prod_db::ProdDb},
    interval::month::month,
    pipeline::run_months,
};

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Load the ANVISA SNGPC compounded drug sales from 2014 to 2022 into DuckDB, skipping months already loaded."
)]
struct Args {}

fn main() -> Result<(), Box<dyn Error>> {
    let _ = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let archive = ProdDb::anvisa_manipulados();
    {
        let conn = archive.open()?;
        ensure_schema(&conn)?;
    }

    let months = month(2014, 1).up_to(&month(2022, 12));
    let outcomes = run_months(&archive, &archive, &months, Duration::from_secs(1))?;

    let counts = outcomes.iter().counts_by(|(_, outcome)| outcome.kind());
    for (kind, n) in counts.iter().sorted() {
        info!("{}: {} months", kind, n);
    }
    let failed: Vec<String> = outcomes
        .iter()
        .filter(|(_, outcome)| !outcome.is_success())
        .map(|(m, _)| m.to_string())
        .collect();
    if !failed.is_empty() {
        warn!("Months not loaded: {}", failed.join(", "));
    }

    Ok(())
}
