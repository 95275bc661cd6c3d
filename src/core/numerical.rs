use faer::prelude::*;
use log::trace;
use rayon::prelude::*;

use crate::{
    core::{DerivBuffer, ParamBuffer, forward},
    metrics::cross_entropy_unchecked,
};

/// Perturbation used by [`numerical_gradient`].
pub const NUMERICAL_EPSILON: f64 = 1e-4;

/// Central-difference gradient of the mean cross-entropy loss, one parameter element at a
/// time.
///
/// This costs two full forward passes per scalar parameter and exists to check
/// [`back_propagate`](super::back_propagate) on small networks. Elements are evaluated on the
/// rayon pool; every worker perturbs and restores its own copy of `params`.
///
/// Shapes are not checked here.
pub fn numerical_gradient(x: MatRef<f64>, y: MatRef<f64>, params: &ParamBuffer) -> DerivBuffer {
    let mut derivs = DerivBuffer::zeros_like(params);
    let keys: Vec<_> = params.keys().collect();
    for key in keys {
        let nrows = params[key].nrows();
        let ncols = params[key].ncols();
        trace!("numerical gradient of `{key}` ({nrows}×{ncols})");
        let values: Vec<f64> = (0..nrows * ncols)
            .into_par_iter()
            .map_init(
                || params.clone(),
                |perturbed, idx| {
                    let (i, j) = (idx % nrows, idx / nrows);
                    let original = perturbed[key][(i, j)];

                    perturbed[key][(i, j)] = original + NUMERICAL_EPSILON;
                    let loss_plus =
                        cross_entropy_unchecked(forward(x, perturbed, Par::Seq).as_ref(), y);

                    perturbed[key][(i, j)] = original - NUMERICAL_EPSILON;
                    let loss_minus =
                        cross_entropy_unchecked(forward(x, perturbed, Par::Seq).as_ref(), y);

                    perturbed[key][(i, j)] = original;
                    (loss_plus - loss_minus) / (2.0 * NUMERICAL_EPSILON)
                },
            )
            .collect();
        let d = &mut derivs[key];
        for (idx, value) in values.into_iter().enumerate() {
            d[(idx % nrows, idx / nrows)] = value;
        }
    }
    derivs
}
