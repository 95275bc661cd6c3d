use faer::{Accum, linalg::matmul::matmul, prelude::*};

use crate::{
    LayerKind,
    core::{
        Branches, DerivBuffer, LayerParams, LayerResults, ParamBuffer, ResultBuffer, Role,
        forward::square,
    },
};

/// Analytic gradient of the mean cross-entropy loss over the whole batch.
///
/// `cache` must come from [`forward_cached`](super::forward_cached) on the same `x` and
/// `params`. The terminal layer is treated as softmax + cross-entropy, whose combined
/// derivative is `(a - y) / n`.
///
/// Shapes are not checked here.
pub fn back_propagate(
    x: MatRef<f64>,
    y: MatRef<f64>,
    params: &ParamBuffer,
    cache: &ResultBuffer,
    par: Par,
) -> DerivBuffer {
    debug_assert_eq!(params.n_layers(), cache.n_layers());
    let n = x.nrows() as f64;
    let mut derivs = DerivBuffer::zeros_like(params);
    // dL/da of the layer currently being processed, produced by the layer after it.
    let mut da: Option<Mat<f64>> = None;
    for (u, (layer_params, layer_results)) in
        params.layers().iter().zip(cache.layers()).enumerate().rev()
    {
        let a_prev = match u.checked_sub(1) {
            None => x,
            Some(u_prev) => cache.layers()[u_prev].a.as_ref(),
        };
        let a = layer_results.a.as_ref();
        let dz = match da.take() {
            // Softmax with loss.
            None => Mat::from_fn(a.nrows(), a.ncols(), |i, j| (a[(i, j)] - y[(i, j)]) / n),
            Some(da) => layer_params
                .spec()
                .activation
                .backward(da.as_ref(), a),
        };
        let Some(layer_derivs) = derivs.layer_mut(u) else {
            unreachable!("deriv buffer is created from the same params");
        };
        da = back_propagate_layer(
            a_prev,
            layer_params,
            layer_results,
            dz.as_ref(),
            layer_derivs,
            u != 0,
            par,
        );
    }
    derivs
}

/// Back propagates `dz = dL/dz` through one layer.
///
/// Writes `dL/dW` and `dL/db` of every role into `layer_derivs`, and returns `dL/da_prev`
/// when `want_da_prev` is set.
pub fn back_propagate_layer(
    a_prev: MatRef<f64>,
    layer_params: &LayerParams,
    layer_results: &LayerResults,
    dz: MatRef<f64>,
    layer_derivs: &mut LayerParams,
    want_da_prev: bool,
    par: Par,
) -> Option<Mat<f64>> {
    match (layer_params.spec().kind, &layer_results.branches) {
        (LayerKind::Linear, _) => {
            let w = &layer_params[Role::Weight];
            weight_grad(&mut layer_derivs[Role::Weight], a_prev, dz, par);
            column_sum_into(&mut layer_derivs[Role::Bias], dz);
            want_da_prev.then(|| {
                let mut da_prev = Mat::<f64>::zeros(a_prev.nrows(), a_prev.ncols());
                matmul(da_prev.as_mut(), Accum::Replace, dz, w.transpose(), 1.0, par);
                da_prev
            })
        }
        (LayerKind::Quadratic, Branches::Quadratic { zr, zg }) => {
            let dzr = Mat::from_fn(dz.nrows(), dz.ncols(), |i, j| dz[(i, j)] * zg[(i, j)]);
            let dzg = Mat::from_fn(dz.nrows(), dz.ncols(), |i, j| dz[(i, j)] * zr[(i, j)]);
            let dzb = dz;
            let a_prev_sq = square(a_prev);
            weight_grad(&mut layer_derivs[Role::WeightR], a_prev, dzr.as_ref(), par);
            weight_grad(&mut layer_derivs[Role::WeightG], a_prev, dzg.as_ref(), par);
            weight_grad(&mut layer_derivs[Role::WeightB], a_prev_sq.as_ref(), dzb, par);
            column_sum_into(&mut layer_derivs[Role::BiasR], dzr.as_ref());
            column_sum_into(&mut layer_derivs[Role::BiasG], dzg.as_ref());
            column_sum_into(&mut layer_derivs[Role::BiasB], dzb);
            want_da_prev.then(|| {
                let wr = &layer_params[Role::WeightR];
                let wg = &layer_params[Role::WeightG];
                let wb = &layer_params[Role::WeightB];
                let mut da_prev = Mat::<f64>::zeros(a_prev.nrows(), a_prev.ncols());
                matmul(da_prev.as_mut(), Accum::Replace, dzr.as_ref(), wr.transpose(), 1.0, par);
                matmul(da_prev.as_mut(), Accum::Add, dzg.as_ref(), wg.transpose(), 1.0, par);
                // d(a²·Wb)/da contributes 2·(dzb·Wb^T)∘a.
                let mut dab = Mat::<f64>::zeros(a_prev.nrows(), a_prev.ncols());
                matmul(dab.as_mut(), Accum::Replace, dzb, wb.transpose(), 1.0, par);
                for j in 0..da_prev.ncols() {
                    for i in 0..da_prev.nrows() {
                        da_prev[(i, j)] += 2.0 * dab[(i, j)] * a_prev[(i, j)];
                    }
                }
                da_prev
            })
        }
        (LayerKind::Quadratic, Branches::Linear) => {
            unreachable!("quadratic layer {} cached without branches", layer_params.spec().index)
        }
    }
}

/// `dw = a_prev^T · dz`.
fn weight_grad(dw: &mut Mat<f64>, a_prev: MatRef<f64>, dz: MatRef<f64>, par: Par) {
    matmul(dw.as_mut(), Accum::Replace, a_prev.transpose(), dz, 1.0, par);
}

fn column_sum_into(db: &mut Mat<f64>, dz: MatRef<f64>) {
    for j in 0..dz.ncols() {
        db[(0, j)] = (0..dz.nrows()).map(|i| dz[(i, j)]).sum();
    }
}
