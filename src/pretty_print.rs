use std::fmt::{self, Debug, Display};

use faer::prelude::*;

use crate::{LayerKind, core::LayerParams};

/// Renders one layer: its formula, then every tensor row by row.
///
/// ```text
/// a_1 = softmax(a_0·W + b)
/// w1 (3×2)
///   [ 0.0123 -0.0040]
///   ...
/// ```
pub struct PrettyPrintParams<'a> {
    layer: &'a LayerParams,
}

impl<'a> PrettyPrintParams<'a> {
    pub fn new(layer: &'a LayerParams) -> Self {
        Self { layer }
    }
}

impl Debug for PrettyPrintParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

fn write_element(f: &mut fmt::Formatter, element: f64) -> fmt::Result {
    if element.is_sign_positive() {
        write!(f, " {:.04?}", element)
    } else {
        write!(f, "{:.04?}", element)
    }
}

fn write_matrix(f: &mut fmt::Formatter, m: MatRef<f64>) -> fmt::Result {
    for i in 0..m.nrows() {
        write!(f, "  [")?;
        for j in 0..m.ncols() {
            if j != 0 {
                write!(f, " ")?;
            }
            write_element(f, m[(i, j)])?;
        }
        writeln!(f, "]")?;
    }
    Ok(())
}

impl Display for PrettyPrintParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let spec = self.layer.spec();
        let i_layer = spec.index;
        let phi = spec.activation.name();
        let input = match i_layer.checked_sub(1) {
            None => "x".to_owned(),
            Some(i_previous) => format!("a_{i_previous}"),
        };
        match spec.kind {
            LayerKind::Linear => writeln!(f, "a_{i_layer} = {phi}({input}·W + b)")?,
            LayerKind::Quadratic => writeln!(
                f,
                "a_{i_layer} = {phi}(({input}·Wr + br)∘({input}·Wg + bg) + ({input}∘{input})·Wb + bb)"
            )?,
        }
        for (role, tensor) in self.layer.iter() {
            writeln!(
                f,
                "{}{i_layer} ({}×{})",
                role.name(),
                tensor.nrows(),
                tensor.ncols()
            )?;
            write_matrix(f, tensor.as_ref())?;
        }
        Ok(())
    }
}
