//! Optimizers.
//!
//! Every optimizer updates a [`ParamBuffer`] in place from a [`DerivBuffer`], walking the
//! keys of the gradient set and looking the matching parameter and accumulator tensors up by
//! key. Accumulators live in an [`OptimizerState`] owned next to the parameters; the caller
//! picks the optimizer type explicitly.

use faer::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{DerivBuffer, Error, OptimizerState, ParamBuffer, ParamKey, Result};

/// Added to the denominator of the adaptive updates.
pub const OPTIMIZER_EPSILON: f64 = 1e-7;

pub trait Optimizer {
    fn name(&self) -> &'static str;

    /// Applies one update to `params` using `grads`.
    fn step(
        &mut self,
        params: &mut ParamBuffer,
        state: &mut OptimizerState,
        grads: &DerivBuffer,
    ) -> Result<()>;
}

fn validate_lr(lr: f64) -> Result<()> {
    if !(lr.is_finite() && lr >= 0.0) {
        return Err(Error::configuration(format!(
            "learning rate must be finite and >= 0, got {lr}"
        )));
    }
    Ok(())
}

fn validate_rate(what: &str, rate: f64) -> Result<()> {
    if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
        return Err(Error::configuration(format!(
            "{what} must be finite and in [0, 1), got {rate}"
        )));
    }
    Ok(())
}

/// Looks `key` up in `buffer` and checks it has the shape of `grad`.
fn tensor_for<'a>(
    buffer: &'a mut ParamBuffer,
    key: ParamKey,
    grad: &Mat<f64>,
) -> Result<&'a mut Mat<f64>> {
    let tensor = buffer
        .get_mut(key)
        .ok_or(Error::UnknownParameter { key })?;
    Error::check_shape("gradient row count", grad.nrows(), tensor.nrows())?;
    Error::check_shape("gradient column count", grad.ncols(), tensor.ncols())?;
    Ok(tensor)
}

/// Checks every gradient against every buffer the update touches, so that a bad gradient
/// set is rejected before anything is modified.
fn check_grads(grads: &DerivBuffer, buffers: &[&ParamBuffer]) -> Result<()> {
    for (key, grad) in grads.iter() {
        for buffer in buffers {
            let tensor = buffer.get(key).ok_or(Error::UnknownParameter { key })?;
            Error::check_shape("gradient row count", grad.nrows(), tensor.nrows())?;
            Error::check_shape("gradient column count", grad.ncols(), tensor.ncols())?;
        }
    }
    Ok(())
}

/// Calls `f(param, accumulator, grad)` for every element of tensor `key`.
fn for_each_element(
    param: &mut Mat<f64>,
    acc: &mut Mat<f64>,
    grad: &Mat<f64>,
    mut f: impl FnMut(&mut f64, &mut f64, f64),
) {
    for j in 0..grad.ncols() {
        for i in 0..grad.nrows() {
            f(&mut param[(i, j)], &mut acc[(i, j)], grad[(i, j)]);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    pub lr: f64,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self { lr: 0.01 }
    }
}

/// Plain gradient descent: `param -= lr * grad`.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: SgdConfig,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Result<Self> {
        validate_lr(config.lr)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn step(
        &mut self,
        params: &mut ParamBuffer,
        _: &mut OptimizerState,
        grads: &DerivBuffer,
    ) -> Result<()> {
        check_grads(grads, &[&*params])?;
        let lr = self.config.lr;
        for (key, grad) in grads.iter() {
            let param = tensor_for(params, key, grad)?;
            for j in 0..grad.ncols() {
                for i in 0..grad.nrows() {
                    param[(i, j)] -= lr * grad[(i, j)];
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaGradConfig {
    pub lr: f64,
}

impl Default for AdaGradConfig {
    fn default() -> Self {
        Self { lr: 0.01 }
    }
}

/// AdaGrad: accumulates squared gradients in `h`, so the per-parameter step shrinks as
/// gradients keep arriving.
#[derive(Debug, Clone)]
pub struct AdaGrad {
    config: AdaGradConfig,
}

impl AdaGrad {
    pub fn new(config: AdaGradConfig) -> Result<Self> {
        validate_lr(config.lr)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AdaGradConfig {
        &self.config
    }
}

impl Optimizer for AdaGrad {
    fn name(&self) -> &'static str {
        "adagrad"
    }

    fn step(
        &mut self,
        params: &mut ParamBuffer,
        state: &mut OptimizerState,
        grads: &DerivBuffer,
    ) -> Result<()> {
        check_grads(grads, &[&*params, &state.h])?;
        let lr = self.config.lr;
        for (key, grad) in grads.iter() {
            let param = tensor_for(params, key, grad)?;
            let h = tensor_for(&mut state.h, key, grad)?;
            for_each_element(param, h, grad, |p, h, g| {
                *h += g * g;
                *p -= lr * g / (h.sqrt() + OPTIMIZER_EPSILON);
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RmsPropConfig {
    pub lr: f64,
    pub decay_rate: f64,
}

impl Default for RmsPropConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            decay_rate: 0.99,
        }
    }
}

/// RMSprop: like AdaGrad, but `h` is an exponential moving average of squared gradients.
#[derive(Debug, Clone)]
pub struct RmsProp {
    config: RmsPropConfig,
}

impl RmsProp {
    pub fn new(config: RmsPropConfig) -> Result<Self> {
        validate_lr(config.lr)?;
        validate_rate("decay_rate", config.decay_rate)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RmsPropConfig {
        &self.config
    }
}

impl Optimizer for RmsProp {
    fn name(&self) -> &'static str {
        "rmsprop"
    }

    fn step(
        &mut self,
        params: &mut ParamBuffer,
        state: &mut OptimizerState,
        grads: &DerivBuffer,
    ) -> Result<()> {
        check_grads(grads, &[&*params, &state.h])?;
        let RmsPropConfig { lr, decay_rate } = self.config;
        for (key, grad) in grads.iter() {
            let param = tensor_for(params, key, grad)?;
            let h = tensor_for(&mut state.h, key, grad)?;
            for_each_element(param, h, grad, |p, h, g| {
                *h = decay_rate * *h + (1.0 - decay_rate) * g * g;
                *p -= lr * g / (h.sqrt() + OPTIMIZER_EPSILON);
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            beta1: 0.9,
            beta2: 0.999,
        }
    }
}

/// Adam with the bias correction folded into the learning rate:
/// `lr_t = lr * sqrt(1 - beta2^t) / (1 - beta1^t)`.
///
/// The iteration counter `t` belongs to this value and counts calls to `step` since
/// construction (or the last [`reset`](Adam::reset)).
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    iteration: u32,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Result<Self> {
        validate_lr(config.lr)?;
        validate_rate("beta1", config.beta1)?;
        validate_rate("beta2", config.beta2)?;
        Ok(Self {
            config,
            iteration: 0,
        })
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Bias-corrected learning rate for the current iteration.
    pub fn lr_t(&self) -> f64 {
        let AdamConfig { lr, beta1, beta2 } = self.config;
        let t = self.iteration as i32;
        lr * f64::sqrt(1.0 - beta2.powi(t)) / (1.0 - beta1.powi(t))
    }

    /// Starts a new run: the next `step` is iteration 1 again.
    pub fn reset(&mut self) {
        self.iteration = 0;
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn step(
        &mut self,
        params: &mut ParamBuffer,
        state: &mut OptimizerState,
        grads: &DerivBuffer,
    ) -> Result<()> {
        check_grads(grads, &[&*params, &state.m, &state.v])?;
        self.iteration += 1;
        let AdamConfig { beta1, beta2, .. } = self.config;
        let lr_t = self.lr_t();
        for (key, grad) in grads.iter() {
            let param = tensor_for(params, key, grad)?;
            let m = tensor_for(&mut state.m, key, grad)?;
            let v = tensor_for(&mut state.v, key, grad)?;
            for j in 0..grad.ncols() {
                for i in 0..grad.nrows() {
                    let g = grad[(i, j)];
                    m[(i, j)] += (1.0 - beta1) * (g - m[(i, j)]);
                    v[(i, j)] += (1.0 - beta2) * (g * g - v[(i, j)]);
                    param[(i, j)] -= lr_t * m[(i, j)] / (v[(i, j)].sqrt() + OPTIMIZER_EPSILON);
                }
            }
        }
        Ok(())
    }
}
