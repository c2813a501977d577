use std::{error::Error, path::PathBuf};

use clap::Parser;
use duckdb::AccessMode;
use log::info;
use sngpc::{
    db::{anvisa::manipulados_archive::NumericColumn, prod_db::ProdDb},
    forecast::{
        compare,
        model::{AutoRegressor, TrainingConfig},
        plot::write_prediction_plot,
        PreparedSeries,
    },
    utils::lib_duckdb::open_with_retry,
};

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Train a monthly forecast of compounded drug sales from the loaded data."
)]
struct Args {
    /// Numeric column to forecast, summed by month
    #[arg(short, long, default_value = "qtd_unidade_farmacotecnica")]
    target: NumericColumn,

    /// Number of previous months used to predict the next one
    #[arg(short, long, default_value_t = 3)]
    seq_length: usize,

    /// Fraction of the windows kept for validation, taken from the end
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,

    /// Where to write the best model
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Write a chart of real vs predicted values to this html file
    #[arg(long)]
    plot: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let archive = ProdDb::anvisa_manipulados();
    let conn = open_with_retry(
        &archive.duckdb_path,
        8,
        std::time::Duration::from_millis(25),
        AccessMode::ReadOnly,
    )?;
    let series = archive.get_monthly_totals(&conn, args.target)?;
    drop(conn);
    info!("{} months of {}", series.len(), args.target.name());

    let prepared = PreparedSeries::new(&series)?;
    let seqs = prepared.sequences(args.seq_length)?;
    let (train, test) = seqs.split(args.test_fraction);

    let checkpoint = args
        .checkpoint
        .unwrap_or_else(|| PathBuf::from(ProdDb::forecast_checkpoint()));
    let mut model = AutoRegressor::new(args.seq_length);
    let history = model.fit(&train, &test, &TrainingConfig::default(), Some(&checkpoint))?;
    if let Some(last) = history.epochs.last() {
        info!(
            "trained {} epochs, loss {:.6}, val_loss {:.6}, best epoch {:?}",
            history.epochs.len(),
            last.loss,
            last.val_loss,
            history.best_epoch
        );
    }
    info!("model saved to {}", checkpoint.display());

    let months = prepared.target_months(args.seq_length);
    let predictions = compare(&model, &test, &months[train.len()..], &prepared.scaler);
    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    for p in &predictions {
        wtr.serialize(p)?;
    }
    wtr.flush()?;

    if let Some(path) = args.plot {
        write_prediction_plot(&predictions, &path)?;
        info!("plot written to {}", path.display());
    }

    Ok(())
}
