//! Offline forecasting of a monthly series built from `vendas_manipulados`.
//!
//! The series is one value per month (the sum of a numeric column), scaled to
//! `[0, 1]`, cut in sliding windows and fed to a linear autoregressive model.
//! The loader never calls into this module.

pub mod model;
pub mod plot;
pub mod scaler;
pub mod sequences;

use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::db::anvisa::StoreError;
use crate::interval::month::Month;

use self::model::AutoRegressor;
use self::scaler::MinMaxScaler;
use self::sequences::{make_sequences, Sequences};

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("not enough data: need at least {needed} values, got {got}")]
    NotEnoughData { needed: usize, got: usize },
    #[error("{0}")]
    Shape(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A monthly series ready for training.
#[derive(Debug, Clone)]
pub struct PreparedSeries {
    pub months: Vec<Month>,
    pub scaler: MinMaxScaler,
    pub scaled: Vec<f64>,
}

impl PreparedSeries {
    /// Drop non finite values and fit the scaler on what is left.  Input is
    /// expected in chronological order.
    pub fn new(series: &[(Month, f64)]) -> Result<PreparedSeries, ForecastError> {
        let (months, values): (Vec<Month>, Vec<f64>) = series
            .iter()
            .filter(|(_, v)| v.is_finite())
            .copied()
            .unzip();
        let scaler = MinMaxScaler::fit(&values)?;
        let scaled = scaler.transform(&values);
        Ok(PreparedSeries {
            months,
            scaler,
            scaled,
        })
    }

    pub fn sequences(&self, seq_length: usize) -> Result<Sequences, ForecastError> {
        make_sequences(&self.scaled, seq_length)
    }

    /// Month of each window's target.
    pub fn target_months(&self, seq_length: usize) -> Vec<Month> {
        self.months.iter().skip(seq_length).copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub month: Month,
    pub real: f64,
    pub predicted: f64,
}

/// Predict the windows and put real and predicted values back in the units
/// of the series.  `months` are the months of the targets, in the same order.
pub fn compare(
    model: &AutoRegressor,
    data: &Sequences,
    months: &[Month],
    scaler: &MinMaxScaler,
) -> Vec<Prediction> {
    let predicted = scaler.inverse_transform(&model.predict(&data.inputs));
    let real = scaler.inverse_transform(&data.targets);
    months
        .iter()
        .zip(real.into_iter().zip(predicted))
        .map(|(month, (real, predicted))| Prediction {
            month: *month,
            real,
            predicted,
        })
        .collect()
}
