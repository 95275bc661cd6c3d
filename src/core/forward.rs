use faer::{Accum, linalg::matmul::matmul, prelude::*};

use crate::{
    LayerKind,
    core::{Branches, LayerParams, LayerResults, ParamBuffer, ResultBuffer, Role},
};

/// `a·W + b`, with `b` broadcast over the rows of `a`.
pub(crate) fn affine(a: MatRef<f64>, w: &Mat<f64>, b: &Mat<f64>, par: Par) -> Mat<f64> {
    debug_assert_eq!(a.ncols(), w.nrows());
    debug_assert_eq!(b.ncols(), w.ncols());
    let mut z = Mat::<f64>::zeros(a.nrows(), w.ncols());
    // A = α*L*R + β*A
    matmul(
        z.as_mut(),       // A = z
        Accum::Replace,   // β = 0.0
        a,                // L = a
        w.as_ref(),       // R = W
        1.0,              // α = 1.0
        par,
    );
    for j in 0..z.ncols() {
        let bj = b[(0, j)];
        for i in 0..z.nrows() {
            z[(i, j)] += bj;
        }
    }
    z
}

/// Elementwise `a ∘ a`.
pub(crate) fn square(a: MatRef<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)] * a[(i, j)])
}

/// Runs one layer on `a_prev`, keeping whatever the backward pass needs.
pub fn forward_layer(a_prev: MatRef<f64>, layer: &LayerParams, par: Par) -> LayerResults {
    let phi = layer.spec().activation;
    match layer.spec().kind {
        LayerKind::Linear => {
            let mut a = affine(a_prev, &layer[Role::Weight], &layer[Role::Bias], par);
            phi.apply(&mut a);
            LayerResults {
                a,
                branches: Branches::Linear,
            }
        }
        LayerKind::Quadratic => {
            let zr = affine(a_prev, &layer[Role::WeightR], &layer[Role::BiasR], par);
            let zg = affine(a_prev, &layer[Role::WeightG], &layer[Role::BiasG], par);
            let a_prev_sq = square(a_prev);
            let zb = affine(
                a_prev_sq.as_ref(),
                &layer[Role::WeightB],
                &layer[Role::BiasB],
                par,
            );
            // z = zr ∘ zg + zb
            let mut a = Mat::from_fn(zb.nrows(), zb.ncols(), |i, j| {
                zr[(i, j)] * zg[(i, j)] + zb[(i, j)]
            });
            phi.apply(&mut a);
            LayerResults {
                a,
                branches: Branches::Quadratic { zr, zg },
            }
        }
    }
}

/// Inference pass: runs every layer in order without caching, returning the raw scores of
/// the final layer.
///
/// Shapes are not checked here; `x` must have `n_inputs` columns.
pub fn forward(x: MatRef<f64>, params: &ParamBuffer, par: Par) -> Mat<f64> {
    let mut a: Option<Mat<f64>> = None;
    for layer in params.layers() {
        let a_prev = match &a {
            None => x,
            Some(a) => a.as_ref(),
        };
        a = Some(forward_layer(a_prev, layer, par).a);
    }
    a.unwrap_or_else(|| x.to_owned())
}

/// Training pass: like [`forward`], but returns every layer's intermediates.
pub fn forward_cached(x: MatRef<f64>, params: &ParamBuffer, par: Par) -> ResultBuffer {
    let mut results = ResultBuffer::with_capacity(params.n_layers());
    for layer in params.layers() {
        let a_prev = match results.last() {
            None => x,
            Some(prev) => prev.a.as_ref(),
        };
        let layer_results = forward_layer(a_prev, layer, par);
        results.push(layer_results);
    }
    results
}
