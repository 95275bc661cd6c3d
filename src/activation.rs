use faer::prelude::*;
use serde::{Deserialize, Serialize};

/// Activation applied to the output of a layer.
///
/// Both the forward formula and the backward formula are dispatched on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
    ReLU,
    Sigmoid,
    Softmax,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-x))
}

/// Numerically stabilized softmax of a single vector, in place.
///
/// The maximum is subtracted before exponentiating, so large inputs do not overflow.
pub fn softmax(xs: &mut [f64]) {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0f64;
    for x in xs.iter_mut() {
        *x = f64::exp(*x - max);
        sum += *x;
    }
    for x in xs.iter_mut() {
        *x /= sum;
    }
}

impl Activation {
    pub fn name(self) -> &'static str {
        match self {
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Softmax => "softmax",
        }
    }

    /// Applies the activation to a batch (one sample per row), in place.
    pub fn apply(self, z: &mut Mat<f64>) {
        match self {
            Activation::ReLU => map_in_place(z, |x| f64::max(0.0, x)),
            Activation::Sigmoid => map_in_place(z, sigmoid),
            Activation::Softmax => {
                let mut row = vec![0.0f64; z.ncols()];
                for i in 0..z.nrows() {
                    for (j, x) in row.iter_mut().enumerate() {
                        *x = z[(i, j)];
                    }
                    softmax(&mut row);
                    for (j, &x) in row.iter().enumerate() {
                        z[(i, j)] = x;
                    }
                }
            }
        }
    }

    /// Given `da = dL/da` and the cached output `a = phi(z)`, returns `dL/dz`.
    ///
    /// This is only used for non-terminal layers. The terminal softmax is folded into the
    /// cross-entropy derivative by the caller.
    pub fn backward(self, da: MatRef<f64>, a: MatRef<f64>) -> Mat<f64> {
        debug_assert_eq!(da.nrows(), a.nrows());
        debug_assert_eq!(da.ncols(), a.ncols());
        match self {
            // Subgradient at 0 is 0.
            Activation::ReLU => Mat::from_fn(a.nrows(), a.ncols(), |i, j| match a[(i, j)] != 0.0 {
                true => da[(i, j)],
                false => 0.0,
            }),
            Activation::Sigmoid => Mat::from_fn(a.nrows(), a.ncols(), |i, j| {
                da[(i, j)] * (1.0 - a[(i, j)]) * a[(i, j)]
            }),
            // dz_i = a_i * (da_i - sum_j da_j * a_j), row by row.
            Activation::Softmax => {
                let dots: Vec<f64> = (0..a.nrows())
                    .map(|i| (0..a.ncols()).map(|j| da[(i, j)] * a[(i, j)]).sum())
                    .collect();
                Mat::from_fn(a.nrows(), a.ncols(), |i, j| {
                    a[(i, j)] * (da[(i, j)] - dots[i])
                })
            }
        }
    }
}

pub(crate) fn map_in_place(m: &mut Mat<f64>, f: impl Fn(f64) -> f64) {
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            m[(i, j)] = f(m[(i, j)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_rows_are_distributions() {
        let mut z = Mat::from_fn(4, 3, |i, j| (i as f64 - 1.5) * 300.0 + j as f64 * 7.0);
        z[(2, 1)] = -1000.0;
        Activation::Softmax.apply(&mut z);
        for i in 0..z.nrows() {
            let mut sum = 0.0;
            for j in 0..z.ncols() {
                assert!((0.0..=1.0).contains(&z[(i, j)]));
                sum += z[(i, j)];
            }
            assert!((sum - 1.0).abs() < 1e-9, "row {i} sums to {sum}");
        }
    }

    #[test]
    fn softmax_single_vector_survives_overflow() {
        let mut xs = [1000.0, 1001.0, 1002.0];
        softmax(&mut xs);
        assert!(xs.iter().all(|x| x.is_finite()));
        assert!((xs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(xs[2] > xs[1] && xs[1] > xs[0]);
    }

    #[test]
    fn relu_and_sigmoid_forward() {
        let mut z = Mat::from_fn(1, 3, |_, j| j as f64 - 1.0);
        Activation::ReLU.apply(&mut z);
        assert_eq!([z[(0, 0)], z[(0, 1)], z[(0, 2)]], [0.0, 0.0, 1.0]);

        let mut z = Mat::<f64>::zeros(1, 1);
        Activation::Sigmoid.apply(&mut z);
        assert_eq!(z[(0, 0)], 0.5);
    }

    #[test]
    fn relu_backward_masks_inactive_units() {
        let a = Mat::from_fn(1, 3, |_, j| [0.0, 2.0, 0.5][j]);
        let da = Mat::from_fn(1, 3, |_, _| 3.0);
        let dz = Activation::ReLU.backward(da.as_ref(), a.as_ref());
        assert_eq!([dz[(0, 0)], dz[(0, 1)], dz[(0, 2)]], [0.0, 3.0, 3.0]);
    }

    #[test]
    fn sigmoid_backward_uses_cached_output() {
        let a = Mat::from_fn(1, 1, |_, _| 0.25);
        let da = Mat::from_fn(1, 1, |_, _| 2.0);
        let dz = Activation::Sigmoid.backward(da.as_ref(), a.as_ref());
        assert!((dz[(0, 0)] - 2.0 * 0.75 * 0.25).abs() < 1e-15);
    }
}
