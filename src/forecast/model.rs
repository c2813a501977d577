use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use super::sequences::Sequences;
use super::ForecastError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Number of epochs without improvement of the validation loss before stopping.
    pub patience: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 50,
            batch_size: 8,
            learning_rate: 0.05,
            patience: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochLoss {
    pub epoch: usize,
    pub loss: f64,
    pub val_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochLoss>,
    /// Epoch whose weights were kept, `None` if no epoch had a finite validation loss.
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

/// Linear autoregressive model: the next value is a weighted sum of the previous
/// `seq_length` values plus a bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoRegressor {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl AutoRegressor {
    pub fn new(seq_length: usize) -> AutoRegressor {
        AutoRegressor {
            weights: vec![0.0; seq_length],
            bias: 0.0,
        }
    }

    pub fn seq_length(&self) -> usize {
        self.weights.len()
    }

    pub fn predict_one(&self, window: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(window)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }

    pub fn predict(&self, inputs: &[Vec<f64>]) -> Vec<f64> {
        inputs.iter().map(|x| self.predict_one(x)).collect()
    }

    /// Mean squared error.  Zero for an empty set.
    pub fn loss(&self, data: &Sequences) -> f64 {
        if data.is_empty() {
            return 0.0;
        }
        let sse: f64 = data
            .inputs
            .iter()
            .zip(&data.targets)
            .map(|(x, y)| (self.predict_one(x) - y).powi(2))
            .sum();
        sse / data.len() as f64
    }

    fn check_shape(&self, data: &Sequences) -> Result<(), ForecastError> {
        match data.inputs.iter().find(|x| x.len() != self.seq_length()) {
            Some(x) => Err(ForecastError::Shape(format!(
                "expected windows of length {}, got {}",
                self.seq_length(),
                x.len()
            ))),
            None => Ok(()),
        }
    }

    fn step(&mut self, inputs: &[Vec<f64>], targets: &[f64], learning_rate: f64) {
        let n = targets.len() as f64;
        let mut grad_w = vec![0.0; self.weights.len()];
        let mut grad_b = 0.0;
        for (x, y) in inputs.iter().zip(targets) {
            let err = self.predict_one(x) - y;
            for (g, xi) in grad_w.iter_mut().zip(x) {
                *g += 2.0 * err * xi / n;
            }
            grad_b += 2.0 * err / n;
        }
        for (w, g) in self.weights.iter_mut().zip(grad_w) {
            *w -= learning_rate * g;
        }
        self.bias -= learning_rate * grad_b;
    }

    /// Mini-batch gradient descent on the mean squared error, in chronological
    /// order.  Stops when the validation loss hasn't improved for `patience`
    /// epochs and keeps the weights of the best epoch.  If `checkpoint` is given,
    /// the model is saved there every time the validation loss improves.
    /// Without validation data the training loss is monitored instead.
    pub fn fit(
        &mut self,
        train: &Sequences,
        validation: &Sequences,
        config: &TrainingConfig,
        checkpoint: Option<&Path>,
    ) -> Result<TrainingHistory, ForecastError> {
        if train.is_empty() {
            return Err(ForecastError::NotEnoughData { needed: 1, got: 0 });
        }
        self.check_shape(train)?;
        self.check_shape(validation)?;
        let batch_size = config.batch_size.max(1);

        let mut history = TrainingHistory::default();
        let mut best = self.clone();
        let mut best_loss = f64::INFINITY;
        let mut wait = 0;

        for epoch in 0..config.epochs {
            for (xs, ys) in train
                .inputs
                .chunks(batch_size)
                .zip(train.targets.chunks(batch_size))
            {
                self.step(xs, ys, config.learning_rate);
            }
            let loss = self.loss(train);
            let val_loss = if validation.is_empty() {
                loss
            } else {
                self.loss(validation)
            };
            history.epochs.push(EpochLoss {
                epoch,
                loss,
                val_loss,
            });

            if val_loss.is_finite() && val_loss < best_loss {
                best_loss = val_loss;
                best = self.clone();
                history.best_epoch = Some(epoch);
                wait = 0;
                if let Some(path) = checkpoint {
                    self.save(path)?;
                }
            } else {
                wait += 1;
                if wait >= config.patience {
                    info!(
                        "early stopping at epoch {}, best epoch {:?}",
                        epoch, history.best_epoch
                    );
                    history.stopped_early = true;
                    break;
                }
            }
        }

        *self = best;
        Ok(history)
    }

    pub fn save(&self, path: &Path) -> Result<(), ForecastError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<AutoRegressor, ForecastError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
