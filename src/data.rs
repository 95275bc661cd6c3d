use faer::prelude::*;

use crate::{Error, Result};

/// A set of sample points paired with their one-hot labels, one sample per row.
#[derive(Debug, Clone, Copy)]
pub struct Samples<'a> {
    pub points: MatRef<'a, f64>,
    pub labels: MatRef<'a, f64>,
}

impl<'a> Samples<'a> {
    pub fn new(points: MatRef<'a, f64>, labels: MatRef<'a, f64>) -> Result<Self> {
        if points.nrows() == 0 {
            return Err(Error::configuration("sample set must not be empty"));
        }
        Error::check_shape("label row count", labels.nrows(), points.nrows())?;
        Ok(Self { points, labels })
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One-hot label matrix (`classes.len() × k`) for the given class indices.
pub fn one_hot(classes: &[usize], k: usize) -> Result<Mat<f64>> {
    if let Some(&class) = classes.iter().find(|&&class| class >= k) {
        return Err(Error::configuration(format!(
            "class index {class} out of range for {k} classes"
        )));
    }
    Ok(Mat::from_fn(classes.len(), k, |i, j| match classes[i] == j {
        true => 1.0,
        false => 0.0,
    }))
}

/// Linearly rescales every coordinate so that the global minimum maps to `min` and the
/// global maximum to `max`. The shape of the point cloud is unchanged.
///
/// A constant input has no scale to recover and is returned centred on `(min + max) / 2`.
pub fn normalize(points: MatRef<f64>, min: f64, max: f64) -> Mat<f64> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for j in 0..points.ncols() {
        for i in 0..points.nrows() {
            lo = lo.min(points[(i, j)]);
            hi = hi.max(points[(i, j)]);
        }
    }
    let mid = (max + min) / 2.0;
    if hi <= lo {
        return Mat::from_fn(points.nrows(), points.ncols(), |_, _| mid);
    }
    let scale = (max - min) / (hi - lo);
    let centre = (hi + lo) / 2.0;
    Mat::from_fn(points.nrows(), points.ncols(), |i, j| {
        (points[(i, j)] - centre) * scale + mid
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_rows_have_a_single_one() {
        let labels = one_hot(&[2, 0, 1], 3).unwrap();
        for i in 0..3 {
            let row: Vec<f64> = (0..3).map(|j| labels[(i, j)]).collect();
            assert_eq!(row.iter().sum::<f64>(), 1.0);
        }
        assert_eq!(labels[(0, 2)], 1.0);
        assert!(one_hot(&[3], 3).is_err());
    }

    #[test]
    fn normalize_maps_extremes_to_range() {
        let points = Mat::from_fn(3, 2, |i, j| [[0.0, 10.0], [5.0, 2.5], [7.5, 1.0]][i][j]);
        let scaled = normalize(points.as_ref(), -1.0, 1.0);
        assert!((scaled[(0, 0)] - -1.0).abs() < 1e-12);
        assert!((scaled[(0, 1)] - 1.0).abs() < 1e-12);
        assert!((scaled[(1, 0)] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn samples_require_matching_rows() {
        let points = Mat::<f64>::zeros(4, 2);
        let labels = Mat::<f64>::zeros(3, 2);
        assert!(Samples::new(points.as_ref(), labels.as_ref()).is_err());
        let empty = Mat::<f64>::zeros(0, 2);
        assert!(Samples::new(empty.as_ref(), empty.as_ref()).is_err());
    }
}
