use std::time::{Duration, Instant};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{Error, Network, Optimizer, Result, Samples, metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Epoch budget.
    pub epochs: usize,
    /// Consecutive epochs without a strict improvement of validation loss before stopping.
    pub patience: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 20000,
            patience: 200,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::configuration("epochs must be > 0"));
        }
        if self.patience == 0 {
            return Err(Error::configuration("patience must be > 0"));
        }
        Ok(())
    }
}

/// Tracks the best validation loss seen so far and how long it has stood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    stall: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            stall: 0,
        }
    }

    /// Feeds one validation loss. Returns `true` once `patience` consecutive losses failed
    /// to strictly improve on the best.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best {
            self.best = loss;
            self.stall = 0;
        } else {
            self.stall += 1;
        }
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.stall >= self.patience
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn stall(&self) -> usize {
        self.stall
    }

    pub fn patience(&self) -> usize {
        self.patience
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainState {
    Running,
    EarlyStopped,
    Completed,
}

impl TrainState {
    pub fn is_terminal(self) -> bool {
        self != TrainState::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
}

impl EpochMetrics {
    pub fn evaluate(nn: &Network, samples: Samples) -> Result<Self> {
        let pred = nn.predict(samples.points)?;
        Ok(Self {
            loss: metrics::cross_entropy(pred.as_ref(), samples.labels)?,
            accuracy: metrics::accuracy(pred.as_ref(), samples.labels)?,
            precision: metrics::macro_precision(pred.as_ref(), samples.labels)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based.
    pub epoch: usize,
    /// Cumulative time spent computing gradients and stepping, in seconds.
    pub elapsed_secs: f64,
    pub train: EpochMetrics,
    pub valid: Option<EpochMetrics>,
}

/// Per-epoch metrics of one training run, in epoch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    epochs: Vec<EpochRecord>,
}

impl TrainingRecord {
    fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn epochs(&self) -> &[EpochRecord] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn elapsed_secs(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.elapsed_secs).collect()
    }

    pub fn train_loss(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.train.loss).collect()
    }

    pub fn train_accuracy(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.train.accuracy).collect()
    }

    pub fn train_precision(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.train.precision).collect()
    }

    /// Validation columns skip epochs run without a validation set.
    pub fn valid_loss(&self) -> Vec<f64> {
        self.epochs.iter().filter_map(|r| r.valid).map(|m| m.loss).collect()
    }

    pub fn valid_accuracy(&self) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|r| r.valid)
            .map(|m| m.accuracy)
            .collect()
    }

    pub fn valid_precision(&self) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|r| r.valid)
            .map(|m| m.precision)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub state: TrainState,
    pub epochs: usize,
    /// `None` when no validation set was used.
    pub best_valid_loss: Option<f64>,
    pub record: TrainingRecord,
}

/// Full-batch training loop with early stopping on validation loss.
pub struct Gym<'a> {
    nn: &'a mut Network,
    config: TrainConfig,
    early_stopping: EarlyStopping,
    record: TrainingRecord,
    elapsed: Duration,
    n_epochs: usize,
    state: TrainState,
}

impl<'a> Gym<'a> {
    pub fn new(nn: &'a mut Network, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            nn,
            config,
            early_stopping: EarlyStopping::new(config.patience),
            record: TrainingRecord::default(),
            elapsed: Duration::ZERO,
            n_epochs: 0,
            state: TrainState::Running,
        })
    }

    pub fn state(&self) -> TrainState {
        self.state
    }

    pub fn n_epochs(&self) -> usize {
        self.n_epochs
    }

    pub fn record(&self) -> &TrainingRecord {
        &self.record
    }

    pub fn early_stopping(&self) -> &EarlyStopping {
        &self.early_stopping
    }

    pub fn network(&self) -> &Network {
        self.nn
    }

    /// Runs a single epoch. Does nothing once a terminal state has been reached.
    pub fn epoch<O: Optimizer + ?Sized>(
        &mut self,
        optimizer: &mut O,
        train: Samples,
        valid: Option<Samples>,
    ) -> Result<TrainState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let start = Instant::now();
        self.nn.step(optimizer, train)?;
        self.elapsed += start.elapsed();
        self.n_epochs += 1;

        let train_metrics = EpochMetrics::evaluate(self.nn, train)?;
        let valid_metrics = valid
            .map(|valid| EpochMetrics::evaluate(self.nn, valid))
            .transpose()?;
        let record = EpochRecord {
            epoch: self.n_epochs,
            elapsed_secs: self.elapsed.as_secs_f64(),
            train: train_metrics,
            valid: valid_metrics,
        };
        match valid_metrics {
            Some(v) => debug!(
                "epoch {:5} ({}): train loss {:.7} acc {:.5} | valid loss {:.7} acc {:.5}",
                self.n_epochs,
                optimizer.name(),
                train_metrics.loss,
                train_metrics.accuracy,
                v.loss,
                v.accuracy,
            ),
            None => debug!(
                "epoch {:5} ({}): train loss {:.7} acc {:.5}",
                self.n_epochs,
                optimizer.name(),
                train_metrics.loss,
                train_metrics.accuracy,
            ),
        }
        self.record.push(record);

        let stalled = valid_metrics.is_some_and(|v| self.early_stopping.observe(v.loss));
        if stalled {
            self.state = TrainState::EarlyStopped;
            info!(
                "early stopped after {} epochs, best valid loss {:.7}",
                self.n_epochs,
                self.early_stopping.best()
            );
        } else if self.n_epochs >= self.config.epochs {
            self.state = TrainState::Completed;
            info!(
                "completed {} epochs in {:.3}s",
                self.n_epochs,
                self.elapsed.as_secs_f64()
            );
        }
        Ok(self.state)
    }

    /// Runs epochs until a terminal state.
    pub fn run<O: Optimizer + ?Sized>(
        mut self,
        optimizer: &mut O,
        train: Samples,
        valid: Option<Samples>,
    ) -> Result<TrainReport> {
        while !self.epoch(optimizer, train, valid)?.is_terminal() {}
        Ok(self.finish())
    }

    pub fn finish(self) -> TrainReport {
        let best = self.early_stopping.best();
        TrainReport {
            state: self.state,
            epochs: self.n_epochs,
            best_valid_loss: best.is_finite().then_some(best),
            record: self.record,
        }
    }
}
