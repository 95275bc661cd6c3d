//! Evaluation metrics over prediction and one-hot label matrices (one sample per row).
//!
//! Metrics do not participate in back propagation.

use faer::prelude::*;

use crate::{Error, Result};

/// Added inside the logarithm so that a zero probability does not produce `-inf`.
pub const CROSS_ENTROPY_EPSILON: f64 = 1e-10;

/// Both matrices must have the same, non-empty shape.
fn check_same_shape(pred: MatRef<f64>, labels: MatRef<f64>) -> Result<()> {
    for (what, n) in [
        ("prediction row count", pred.nrows()),
        ("prediction column count", pred.ncols()),
    ] {
        if n == 0 {
            return Err(Error::ShapeMismatch {
                what,
                got: 0,
                expected: 1,
            });
        }
    }
    Error::check_shape("label row count", labels.nrows(), pred.nrows())?;
    Error::check_shape("label column count", labels.ncols(), pred.ncols())
}

/// Mean cross-entropy error: `-mean_rows(sum_k label_k * ln(pred_k + 1e-10))`.
pub fn cross_entropy(pred: MatRef<f64>, labels: MatRef<f64>) -> Result<f64> {
    check_same_shape(pred, labels)?;
    Ok(cross_entropy_unchecked(pred, labels))
}

pub(crate) fn cross_entropy_unchecked(pred: MatRef<f64>, labels: MatRef<f64>) -> f64 {
    let mut sum = 0.0f64;
    for j in 0..pred.ncols() {
        for i in 0..pred.nrows() {
            sum += labels[(i, j)] * f64::ln(pred[(i, j)] + CROSS_ENTROPY_EPSILON);
        }
    }
    -sum / pred.nrows() as f64
}

/// Index of the largest entry of row `i`. Ties go to the lowest index.
pub fn argmax_row(m: MatRef<f64>, i: usize) -> usize {
    let mut best = 0usize;
    for j in 1..m.ncols() {
        if m[(i, j)] > m[(i, best)] {
            best = j;
        }
    }
    best
}

/// Fraction of rows whose predicted class equals the labelled class.
pub fn accuracy(pred: MatRef<f64>, labels: MatRef<f64>) -> Result<f64> {
    check_same_shape(pred, labels)?;
    let n_correct = (0..pred.nrows())
        .filter(|&i| argmax_row(pred, i) == argmax_row(labels, i))
        .count();
    Ok(n_correct as f64 / pred.nrows() as f64)
}

/// Precision of every class: `TP / (TP + FP)`, or 0 for a class that is never predicted.
pub fn class_precisions(pred: MatRef<f64>, labels: MatRef<f64>) -> Result<Vec<f64>> {
    check_same_shape(pred, labels)?;
    let k = pred.ncols();
    let mut true_positives = vec![0usize; k];
    let mut false_positives = vec![0usize; k];
    for i in 0..pred.nrows() {
        let predicted = argmax_row(pred, i);
        match predicted == argmax_row(labels, i) {
            true => true_positives[predicted] += 1,
            false => false_positives[predicted] += 1,
        }
    }
    let precisions = true_positives
        .iter()
        .zip(&false_positives)
        .map(|(&tp, &fp)| match tp + fp {
            0 => 0.0,
            predicted => tp as f64 / predicted as f64,
        })
        .collect();
    Ok(precisions)
}

/// Arithmetic mean of [`class_precisions`].
pub fn macro_precision(pred: MatRef<f64>, labels: MatRef<f64>) -> Result<f64> {
    let precisions = class_precisions(pred, labels)?;
    Ok(precisions.iter().sum::<f64>() / precisions.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::one_hot;

    #[test]
    fn cross_entropy_of_perfect_prediction_is_near_zero() {
        let labels = one_hot(&[0, 2, 1], 3).unwrap();
        let loss = cross_entropy(labels.as_ref(), labels.as_ref()).unwrap();
        assert!((loss - -f64::ln(1.0 + CROSS_ENTROPY_EPSILON)).abs() < 1e-15);
        assert!(loss.abs() < 1e-9);
    }

    #[test]
    fn cross_entropy_of_uniform_prediction_is_log_k() {
        let k = 4;
        let labels = one_hot(&[0, 1, 2, 3, 3], k).unwrap();
        let pred = Mat::from_fn(5, k, |_, _| 1.0 / k as f64);
        let loss = cross_entropy(pred.as_ref(), labels.as_ref()).unwrap();
        assert!((loss - f64::ln(k as f64)).abs() < 1e-8);
    }

    #[test]
    fn macro_precision_skips_division_by_zero() {
        // Predicted vs actual: class 0 → TP 2, FP 1; class 1 never predicted; class 2 → TP 3.
        let predicted = [0, 0, 0, 2, 2, 2];
        let actual = [0, 0, 1, 2, 2, 2];
        let pred = one_hot(&predicted, 3).unwrap();
        let labels = one_hot(&actual, 3).unwrap();
        let precisions = class_precisions(pred.as_ref(), labels.as_ref()).unwrap();
        assert!((precisions[0] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(precisions[1], 0.0);
        assert_eq!(precisions[2], 1.0);
        let average = macro_precision(pred.as_ref(), labels.as_ref()).unwrap();
        assert!((average - 5.0 / 9.0).abs() < 1e-12);
        assert!((average - 0.556).abs() < 1e-3);
    }

    #[test]
    fn accuracy_uses_argmax() {
        let pred = Mat::from_fn(3, 2, |i, j| [[0.9, 0.1], [0.4, 0.6], [0.7, 0.3]][i][j]);
        let labels = one_hot(&[0, 1, 1], 2).unwrap();
        let acc = accuracy(pred.as_ref(), labels.as_ref()).unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let pred = Mat::<f64>::zeros(3, 2);
        let labels = Mat::<f64>::zeros(3, 3);
        assert!(matches!(
            cross_entropy(pred.as_ref(), labels.as_ref()),
            Err(Error::ShapeMismatch { got: 3, expected: 2, .. })
        ));
        assert!(accuracy(pred.as_ref(), labels.as_ref()).is_err());
    }

    #[test]
    fn empty_matrices_are_rejected() {
        let no_rows = Mat::<f64>::zeros(0, 3);
        assert!(matches!(
            cross_entropy(no_rows.as_ref(), no_rows.as_ref()),
            Err(Error::ShapeMismatch { got: 0, .. })
        ));
        assert!(accuracy(no_rows.as_ref(), no_rows.as_ref()).is_err());

        let no_classes = Mat::<f64>::zeros(4, 0);
        assert!(matches!(
            class_precisions(no_classes.as_ref(), no_classes.as_ref()),
            Err(Error::ShapeMismatch { got: 0, .. })
        ));
        assert!(macro_precision(no_classes.as_ref(), no_classes.as_ref()).is_err());
    }
}
