use ndarray::{ArrayViewMut2, Axis};

/// Caps the L2 norm of the weights incoming to each unit, that is, of every column of an
/// `(inputs, units)` weight matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxNorm {
    max: f32,
}

impl MaxNorm {
    pub fn new(max: f32) -> Self {
        Self { max }
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Rescales every column whose norm exceeds the maximum down to exactly the maximum.
    pub fn apply(&self, mut w: ArrayViewMut2<f32>) {
        for mut column in w.axis_iter_mut(Axis(1)) {
            let norm = column.iter().map(|v| v * v).sum::<f32>().sqrt();

            if norm > self.max {
                column *= self.max / norm;
            }
        }
    }
}
